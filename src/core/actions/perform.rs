//! One delivery attempt per action kind.
//!
//! `perform` returns `true` when nothing more should be done (delivered, or
//! failed in a way retrying cannot fix) and `false` when the attempt failed
//! transiently and may be retried.

use super::transport::{Delivered, Delivery, DeliveryError, Transport, Transports};
use crate::core::event::DetectionEvent;
use crate::core::settings::ActionSpec;
use log::{error, info, warn};
use std::sync::Arc;

const MEDIA_TYPE_BINARY: &str = "application/octet-stream";
const S3_KEY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

pub fn alert_text(event: &DetectionEvent) -> String {
    format!("A {} was detected", event.trigger)
}

/// Object key for an uploaded snapshot.
pub fn s3_object_key(key_prefix: &str, event: &DetectionEvent) -> String {
    format!(
        "{}{}.jpg",
        key_prefix,
        event.captured_at.format(S3_KEY_TIME_FORMAT)
    )
}

impl ActionSpec {
    pub fn perform(
        &self,
        transports: &Transports,
        event: &DetectionEvent,
        include_payload: bool,
    ) -> bool {
        match self {
            ActionSpec::Http(spec) => {
                if spec.method != "GET" && spec.method != "POST" {
                    warn!(
                        "Unsupported HTTP method \"{}\" for action \"{}\", aborting action",
                        spec.method, spec.id
                    );
                    // Configuration error: never retried.
                    return true;
                }

                let body = if include_payload && spec.method == "POST" {
                    event.payload_bytes()
                } else {
                    None
                };
                let content_type = if body.is_some() {
                    event.trigger.payload_media_type()
                } else {
                    MEDIA_TYPE_BINARY
                };

                info!(
                    "Performing HTTP action \"{}\" ({} trigger, include payload: {})...",
                    spec.id, event.trigger, include_payload
                );
                let delivery = Delivery {
                    trigger: event.trigger,
                    body,
                    content_type,
                    text: None,
                };
                send_with(&transports.http, &**spec, &delivery, "HTTP", &spec.id)
            }

            ActionSpec::AwsS3(spec) => {
                info!(
                    "Performing AWS S3 action \"{}\" ({} trigger, include payload [IGNORED]: {})...",
                    spec.id, event.trigger, include_payload
                );

                let Some(body) = event.payload_bytes() else {
                    error!(
                        "AWS S3 action \"{}\" has no snapshot to upload, dropping",
                        spec.id
                    );
                    return true;
                };
                let key = s3_object_key(&spec.key_prefix, event);
                let delivery = Delivery {
                    trigger: event.trigger,
                    body: Some(body),
                    content_type: event.trigger.payload_media_type(),
                    text: Some(key.as_str()),
                };
                send_with(&transports.aws_s3, &**spec, &delivery, "AWS S3", &spec.id)
            }

            ActionSpec::PhoneCall(spec) => {
                if include_payload && event.payload.is_some() {
                    warn!("Payload is non-null but it can't be sent over a call, skipping it");
                }
                info!(
                    "Performing phone call action \"{}\" ({} trigger)...",
                    spec.id, event.trigger
                );
                let delivery = Delivery {
                    trigger: event.trigger,
                    body: None,
                    content_type: MEDIA_TYPE_BINARY,
                    text: None,
                };
                send_with(&transports.phone_call, &**spec, &delivery, "phone call", &spec.id)
            }

            ActionSpec::PhoneSms(spec) => {
                if include_payload && event.payload.is_some() {
                    warn!("Payload is non-null but it can't be sent in an SMS, skipping it");
                }
                info!(
                    "Performing SMS action \"{}\" ({} trigger)...",
                    spec.id, event.trigger
                );
                let text = alert_text(event);
                let delivery = Delivery {
                    trigger: event.trigger,
                    body: None,
                    content_type: "text/plain",
                    text: Some(text.as_str()),
                };
                send_with(&transports.phone_sms, &**spec, &delivery, "SMS", &spec.id)
            }

            ActionSpec::PhoneMms(spec) => {
                info!(
                    "Performing MMS action \"{}\" ({} trigger, include payload: {})...",
                    spec.id, event.trigger, include_payload
                );
                let text = alert_text(event);
                let body = if include_payload {
                    event.payload_bytes()
                } else {
                    None
                };
                let delivery = Delivery {
                    trigger: event.trigger,
                    body,
                    content_type: event.trigger.payload_media_type(),
                    text: Some(text.as_str()),
                };
                send_with(&transports.phone_mms, &**spec, &delivery, "MMS", &spec.id)
            }
        }
    }
}

fn send_with<S: 'static>(
    transport: &Option<Arc<dyn Transport<S>>>,
    spec: &S,
    delivery: &Delivery<'_>,
    label: &str,
    id: &str,
) -> bool {
    let Some(transport) = transport else {
        error!(
            "No transport registered for {} actions, dropping action \"{}\"",
            label, id
        );
        return true;
    };

    match transport.send(spec, delivery) {
        Ok(Delivered::HttpStatus(status)) => {
            info!(
                "Performed {} action \"{}\" and got response: {}",
                label, id, status
            );
            true
        }
        Ok(Delivered::Ok) => {
            info!("Performed {} action \"{}\" successfully", label, id);
            true
        }
        Err(DeliveryError::Permanent(reason)) => {
            error!(
                "{} action \"{}\" failed permanently: {}",
                label, id, reason
            );
            true
        }
        Err(DeliveryError::Transient(reason)) => {
            error!("Failed to perform {} action \"{}\": {}", label, id, reason);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::event::{Snapshot, TriggerKind};
    use crate::core::settings::{
        AwsS3Action, HttpAction, PhoneCallAction, PhoneMmsAction, PhoneSmsAction,
    };
    use image::RgbImage;
    use parking_lot::Mutex;

    /// Records what it was asked to send and answers from a script.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub sent: Mutex<Vec<(Option<usize>, String, Option<String>)>>,
        pub fail_transient: bool,
        pub fail_permanent: bool,
    }

    impl RecordingTransport {
        pub fn failing() -> Self {
            Self {
                fail_transient: true,
                ..Default::default()
            }
        }

        pub fn count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    impl<S> Transport<S> for RecordingTransport {
        fn send(&self, _spec: &S, delivery: &Delivery<'_>) -> Result<Delivered, DeliveryError> {
            self.sent.lock().push((
                delivery.body.map(|b| b.len()),
                delivery.content_type.to_string(),
                delivery.text.map(str::to_string),
            ));
            if self.fail_transient {
                Err(DeliveryError::Transient("network down".into()))
            } else if self.fail_permanent {
                Err(DeliveryError::Permanent("rejected".into()))
            } else {
                Ok(Delivered::Ok)
            }
        }
    }

    fn event_with_payload() -> DetectionEvent {
        DetectionEvent::new(TriggerKind::Motion, Some(Snapshot::new(RgbImage::new(16, 16))))
    }

    fn http(method: &str) -> ActionSpec {
        ActionSpec::Http(Arc::new(HttpAction {
            id: "home".into(),
            url: "http://127.0.0.1:9/alarm".into(),
            method: method.into(),
            headers: vec![],
        }))
    }

    #[test]
    fn test_unsupported_http_method_is_not_retried() {
        let recorder = Arc::new(RecordingTransport::failing());
        let transports = Transports::empty().with_http(recorder.clone());

        assert!(http("PUT").perform(&transports, &event_with_payload(), true));
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn test_http_post_carries_jpeg_payload() {
        let recorder = Arc::new(RecordingTransport::default());
        let transports = Transports::empty().with_http(recorder.clone());

        assert!(http("POST").perform(&transports, &event_with_payload(), true));
        assert!(http("POST").perform(&transports, &event_with_payload(), false));

        let sent = recorder.sent.lock();
        assert!(sent[0].0.unwrap() > 0);
        assert_eq!(sent[0].1, "image/jpeg");
        assert_eq!(sent[1].0, None);
        assert_eq!(sent[1].1, "application/octet-stream");
    }

    #[test]
    fn test_transient_failure_asks_for_retry() {
        let transports = Transports::empty().with_http(Arc::new(RecordingTransport::failing()));
        assert!(!http("GET").perform(&transports, &event_with_payload(), false));
    }

    #[test]
    fn test_permanent_failure_is_final() {
        let transports = Transports::empty().with_phone_call(Arc::new(RecordingTransport {
            fail_permanent: true,
            ..Default::default()
        }));
        let call = ActionSpec::PhoneCall(Arc::new(PhoneCallAction {
            id: "me".into(),
            recipient_phone_number: "+100".into(),
        }));
        assert!(call.perform(&transports, &event_with_payload(), true));
    }

    #[test]
    fn test_missing_transport_is_permanent() {
        let sms = ActionSpec::PhoneSms(Arc::new(PhoneSmsAction {
            id: "me".into(),
            recipient_phone_number: "+100".into(),
        }));
        assert!(sms.perform(&Transports::empty(), &event_with_payload(), false));
    }

    #[test]
    fn test_sms_text_and_no_payload() {
        let recorder = Arc::new(RecordingTransport::default());
        let transports = Transports::empty().with_phone_sms(recorder.clone());
        let sms = ActionSpec::PhoneSms(Arc::new(PhoneSmsAction {
            id: "me".into(),
            recipient_phone_number: "+100".into(),
        }));

        assert!(sms.perform(&transports, &event_with_payload(), true));
        let sent = recorder.sent.lock();
        assert_eq!(sent[0].0, None);
        assert_eq!(sent[0].2.as_deref(), Some("A MOTION was detected"));
    }

    #[test]
    fn test_mms_attaches_payload_only_when_asked() {
        let recorder = Arc::new(RecordingTransport::default());
        let transports = Transports::empty().with_phone_mms(recorder.clone());
        let mms = ActionSpec::PhoneMms(Arc::new(PhoneMmsAction {
            id: "me".into(),
            recipient_phone_number: "+100".into(),
        }));

        mms.perform(&transports, &event_with_payload(), true);
        mms.perform(&transports, &event_with_payload(), false);
        let sent = recorder.sent.lock();
        assert!(sent[0].0.is_some());
        assert!(sent[1].0.is_none());
    }

    #[test]
    fn test_s3_upload_key_and_body() {
        let recorder = Arc::new(RecordingTransport::default());
        let transports = Transports::empty().with_aws_s3(recorder.clone());
        let s3 = ActionSpec::AwsS3(Arc::new(AwsS3Action {
            id: "bucket".into(),
            key_prefix: "cam0/".into(),
            ..Default::default()
        }));

        assert!(s3.perform(&transports, &event_with_payload(), false));
        let sent = recorder.sent.lock();
        assert!(sent[0].0.is_some());
        let key = sent[0].2.as_deref().unwrap();
        assert!(key.starts_with("cam0/"));
        assert!(key.ends_with(".jpg"));
    }

    #[test]
    fn test_s3_without_snapshot_is_dropped() {
        let recorder = Arc::new(RecordingTransport::default());
        let transports = Transports::empty().with_aws_s3(recorder.clone());
        let s3 = ActionSpec::AwsS3(Arc::new(AwsS3Action::default()));

        let event = DetectionEvent::new(TriggerKind::Motion, None);
        assert!(s3.perform(&transports, &event, true));
        assert_eq!(recorder.count(), 0);
    }
}
