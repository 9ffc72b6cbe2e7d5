//! Interprets the triggering storage notification, validating its
//! type and extracting the decoded object key.

use crate::error::{Error, Result};
use aws_lambda_events::event::s3::S3EventRecord;
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use std::borrow::Cow;

/// The event category accepted by the pipeline. Any subtype (`Put`,
/// `Copy`, `CompleteMultipartUpload`, ...) is fine.
const OBJECT_CREATED: &str = "ObjectCreated";

/// The minimal view of a notification the pipeline consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingEvent {
    pub event_name: String,
    /// The object key as found in the envelope, possibly URL-encoded.
    pub object_key: String,
    /// The bucket holding the object, if the envelope names one.
    pub bucket: Option<String>,
}

impl IncomingEvent {
    pub fn new(event_name: impl Into<String>, object_key: impl Into<String>) -> Self {
        IncomingEvent {
            event_name: event_name.into(),
            object_key: object_key.into(),
            bucket: None,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }
}

impl From<&S3EventRecord> for IncomingEvent {
    fn from(record: &S3EventRecord) -> Self {
        IncomingEvent {
            event_name: record.event_name.clone().unwrap_or_default(),
            object_key: record.s3.object.key.clone().unwrap_or_default(),
            bucket: record.s3.bucket.name.clone(),
        }
    }
}

/// Decode an object key as S3 writes it in notifications: `+` stands
/// for a space and `%XX` for an escaped byte. A key that doesn't
/// decode to valid UTF-8 is returned as received.
pub fn decode_key(raw: &str) -> Cow<'_, str> {
    if !raw.contains(['+', '%']) {
        return Cow::Borrowed(raw);
    }
    let spaced = raw.replace('+', " ");
    match percent_decode_str(&spaced).decode_utf8() {
        Ok(decoded) => Cow::Owned(decoded.into_owned()),
        Err(_) => Cow::Borrowed(raw),
    }
}

/// Encode a plain key the way notifications carry it, so that
/// [`decode_key`] gives it back unchanged.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, NON_ALPHANUMERIC).to_string()
}

/// Validate the event and return the decoded source key.
pub fn interpret(event: &IncomingEvent) -> Result<String> {
    let category = event.event_name.split(':').next().unwrap_or_default();
    if category != OBJECT_CREATED {
        return Err(Error::InvalidEventType(event.event_name.clone()));
    }
    let key = decode_key(&event.object_key);
    if key.is_empty() {
        return Err(Error::MissingObjectKey);
    }
    Ok(key.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_object_created_subtype() {
        for name in [
            "ObjectCreated:Put",
            "ObjectCreated:Copy",
            "ObjectCreated:CompleteMultipartUpload",
            "ObjectCreated:*",
        ] {
            let key = interpret(&IncomingEvent::new(name, "uploads/cat.jpg")).unwrap();
            assert_eq!(key, "uploads/cat.jpg");
        }
    }

    #[test]
    fn rejects_removal_events() {
        let result = interpret(&IncomingEvent::new("ObjectRemoved:Delete", "uploads/cat.jpg"));
        assert!(matches!(result, Err(Error::InvalidEventType(name)) if name == "ObjectRemoved:Delete"));
    }

    #[test]
    fn rejects_category_lookalikes() {
        let result = interpret(&IncomingEvent::new("ObjectCreatedLater:Put", "a.jpg"));
        assert!(matches!(result, Err(Error::InvalidEventType(_))));
    }

    #[test]
    fn rejects_empty_key() {
        let result = interpret(&IncomingEvent::new("ObjectCreated:Put", ""));
        assert!(matches!(result, Err(Error::MissingObjectKey)));
    }

    #[test]
    fn event_type_is_checked_before_key() {
        let result = interpret(&IncomingEvent::new("ObjectRemoved:Delete", ""));
        assert!(matches!(result, Err(Error::InvalidEventType(_))));
    }

    #[test]
    fn decodes_spaces_and_escapes() {
        assert_eq!(decode_key("my+photo.jpg"), "my photo.jpg");
        assert_eq!(decode_key("my%20photo.jpg"), "my photo.jpg");
        assert_eq!(decode_key("caf%C3%A9%2Bbar.png"), "café+bar.png");
    }

    #[test]
    fn keeps_already_decoded_keys() {
        assert_eq!(decode_key("plain/key.jpg"), "plain/key.jpg");
        assert_eq!(decode_key("100% real.jpg"), "100% real.jpg");
    }

    #[test]
    fn encoded_keys_decode_back() {
        for key in ["a+b c.jpg", "dir/100% real.png", "caf\u{e9}.gif"] {
            assert_eq!(decode_key(&encode_key(key)), key);
        }
    }

    #[test]
    fn keeps_keys_that_do_not_decode_to_utf8() {
        assert_eq!(decode_key("bad%FF.jpg"), "bad%FF.jpg");
    }

    #[test]
    fn builds_from_s3_records() {
        let record: S3EventRecord = serde_json::from_value(serde_json::json!({
            "eventVersion": "2.1",
            "eventSource": "aws:s3",
            "awsRegion": "us-east-1",
            "eventTime": "2019-09-03T19:37:27.192Z",
            "eventName": "ObjectCreated:Put",
            "userIdentity": { "principalId": "AWS:AIDAINPONIXQXHT3IKHL2" },
            "requestParameters": { "sourceIPAddress": "205.255.255.255" },
            "responseElements": {
                "x-amz-request-id": "D82B88E5F771F645",
                "x-amz-id-2": "vlR7PnpV2Ce81l0PRw6jlUpck7Jo5ZsQjryTjKlc5aLWGVHPZLj5NeC6qMa0emYBDXOo6QBU0Wo="
            },
            "s3": {
                "s3SchemaVersion": "1.0",
                "configurationId": "828aa6fc-f7b5-4305-8584-487c791949c1",
                "bucket": {
                    "name": "images",
                    "ownerIdentity": { "principalId": "A3I5XTEXAMAI3E" },
                    "arn": "arn:aws:s3:::images"
                },
                "object": {
                    "key": "uploads/my+cat.jpg",
                    "size": 1305107,
                    "eTag": "b21b84d653bb07b05b1e6b33684dc11b",
                    "sequencer": "0C0F6F405D6ED209E1"
                }
            }
        }))
        .unwrap();
        let event = IncomingEvent::from(&record);
        assert_eq!(event.bucket.as_deref(), Some("images"));
        assert_eq!(interpret(&event).unwrap(), "uploads/my cat.jpg");
    }
}
