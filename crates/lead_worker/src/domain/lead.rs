use crate::domain::InvalidLead;
use garde::{Report, Validate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const FIELD_EMAIL: &str = "SENDER_EMAIL";
const FIELD_NAME: &str = "SENDER_NAME";
const FIELD_MOBILE: &str = "SENDER_MOBILE";
const FIELD_COMPANY: &str = "SENDER_COMPANY";
const FIELD_QUERY_ID: &str = "UNIQUE_QUERY_ID";
const FIELD_CITY: &str = "CITY";
const FIELD_STATE: &str = "STATE";

/// Normalized lead as sent to the contact store.
///
/// `email` is trimmed, lower-cased and is the deduplication key. The other
/// fields are trimmed and empty when the producer did not supply them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Lead {
    #[garde(pattern(r"^[^@ \t\r\n]+@[^@ \t\r\n]+\.[^@ \t\r\n]+$"))]
    pub email: String,
    #[garde(skip)]
    pub name: String,
    #[garde(skip)]
    pub phone_number: String,
    #[garde(skip)]
    pub company_name: String,
    #[garde(skip)]
    pub unique_query_id: String,
    #[garde(skip)]
    pub city: String,
    #[garde(skip)]
    pub state: String,
}

/// Parse and normalize a raw queue payload.
pub fn parse_lead(payload: &[u8]) -> Result<Lead, InvalidLead> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| InvalidLead::MalformedJson(e.to_string()))?;

    let record = match value {
        Value::Object(record) => record,
        _ => return Err(InvalidLead::NotAnObject),
    };

    let email = text_field(&record, FIELD_EMAIL).to_lowercase();
    if email.is_empty() {
        return Err(InvalidLead::MissingEmail);
    }

    let lead = Lead {
        email,
        name: text_field(&record, FIELD_NAME),
        phone_number: text_field(&record, FIELD_MOBILE),
        company_name: text_field(&record, FIELD_COMPANY),
        unique_query_id: text_field(&record, FIELD_QUERY_ID),
        city: text_field(&record, FIELD_CITY),
        state: text_field(&record, FIELD_STATE),
    };

    lead.validate()
        .map_err(|report| InvalidLead::InvalidEmail {
            email: lead.email.clone(),
            details: format_report(&report),
        })?;

    Ok(lead)
}

// Non-string values are treated like an absent field.
fn text_field(record: &Map<String, Value>, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}

fn format_report(report: &Report) -> String {
    report
        .iter()
        .map(|(path, error)| format!("{}: {}", path, error.message()))
        .collect::<Vec<_>>()
        .join(", ")
}
