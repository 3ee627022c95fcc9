//! Job record hash fields and their decoding.

use std::collections::HashMap;

use queue_core::{Job, JobRecord, JobState, Millis};

use crate::StoreError;

pub(crate) const JSON: &str = "json";
pub(crate) const STATE: &str = "state";
pub(crate) const QUEUED_AT: &str = "queued_at";
pub(crate) const LEASED_AT: &str = "leased_at";
pub(crate) const PROCESSING_AT: &str = "processing_at";
pub(crate) const COMPLETED_AT: &str = "completed_at";
pub(crate) const FAILED_AT: &str = "failed_at";
pub(crate) const RETRY_COUNT: &str = "retry_count";

/// Serialize a job document for the `json` field.
pub(crate) fn encode_job(job: &Job) -> Result<String, StoreError> {
    Ok(serde_json::to_string(job)?)
}

pub(crate) fn decode_job(json: &str) -> Result<Job, StoreError> {
    Ok(serde_json::from_str(json)?)
}

/// Fields written by an enqueue, replacing whatever was stored.
pub(crate) fn enqueue_fields(job: &Job, now: Millis) -> Result<Vec<(&'static str, String)>, StoreError> {
    Ok(vec![
        (JSON, encode_job(job)?),
        (STATE, JobState::Queued.as_str().to_string()),
        (QUEUED_AT, now.to_string()),
        (RETRY_COUNT, "0".to_string()),
    ])
}

/// Fields written by a completion.
pub(crate) fn complete_fields(job: &Job, now: Millis) -> Result<Vec<(&'static str, String)>, StoreError> {
    Ok(vec![
        (JSON, encode_job(job)?),
        (STATE, JobState::Completed.as_str().to_string()),
        (COMPLETED_AT, now.to_string()),
    ])
}

/// Decode a record hash. Returns `None` when no document is stored.
pub(crate) fn parse_record(fields: &HashMap<String, String>) -> Result<Option<JobRecord>, StoreError> {
    let Some(json) = fields.get(JSON) else {
        return Ok(None);
    };

    let state = match fields.get(STATE) {
        Some(state) => state.parse::<JobState>().map_err(StoreError::UnexpectedReply)?,
        None => JobState::Queued,
    };

    Ok(Some(JobRecord {
        job: decode_job(json)?,
        state,
        queued_at: millis(fields, QUEUED_AT)?.unwrap_or_default(),
        leased_at: millis(fields, LEASED_AT)?,
        processing_at: millis(fields, PROCESSING_AT)?,
        completed_at: millis(fields, COMPLETED_AT)?,
        failed_at: millis(fields, FAILED_AT)?,
        retry_count: parse_count(fields.get(RETRY_COUNT).map(String::as_str))?,
    }))
}

pub(crate) fn parse_count(raw: Option<&str>) -> Result<u32, StoreError> {
    match raw {
        None => Ok(0),
        Some(raw) => raw
            .parse()
            .map_err(|_| StoreError::UnexpectedReply(format!("retry count: {raw}"))),
    }
}

pub(crate) fn parse_millis(raw: &str) -> Result<Millis, StoreError> {
    raw.parse::<Millis>()
        .or_else(|_| raw.parse::<f64>().map(|value| value as Millis))
        .map_err(|_| StoreError::UnexpectedReply(format!("timestamp: {raw}")))
}

fn millis(fields: &HashMap<String, String>, field: &str) -> Result<Option<Millis>, StoreError> {
    fields.get(field).map(|raw| parse_millis(raw)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_core::{JobId, QueueName};
    use serde_json::Map;

    #[test]
    fn parses_a_leased_record() {
        let job = Job::new(QueueName::new("q").unwrap(), Map::new())
            .with_id(JobId::new("j1").unwrap())
            .with_field("command", "ls");
        let mut fields: HashMap<String, String> = enqueue_fields(&job, 100)
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        fields.insert(STATE.into(), "leased".into());
        fields.insert(LEASED_AT.into(), "250".into());

        let record = parse_record(&fields).unwrap().unwrap();
        assert_eq!(record.job, job);
        assert_eq!(record.state, JobState::Leased);
        assert_eq!(record.queued_at, 100);
        assert_eq!(record.leased_at, Some(250));
        assert_eq!(record.processing_at, None);
        assert_eq!(record.retry_count, 0);
    }

    #[test]
    fn missing_document_is_no_record() {
        let mut fields = HashMap::new();
        fields.insert(RETRY_COUNT.to_string(), "2".to_string());
        assert!(parse_record(&fields).unwrap().is_none());
    }

    #[test]
    fn garbage_state_is_rejected() {
        let mut fields = HashMap::new();
        fields.insert(JSON.to_string(), r#"{"uuid":"a","queue_name":"q"}"#.to_string());
        fields.insert(STATE.to_string(), "exploded".to_string());
        assert!(matches!(
            parse_record(&fields),
            Err(StoreError::UnexpectedReply(_))
        ));
    }
}
