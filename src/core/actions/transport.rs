//! Delivery transports, one per action kind.

use crate::core::event::TriggerKind;
use crate::core::settings::{
    AwsS3Action, HttpAction, PhoneCallAction, PhoneMmsAction, PhoneSmsAction,
};
use log::info;
use reqwest::blocking::Client;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network or service hiccup, worth another attempt.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Retrying will not help (bad configuration, missing transport...).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Ok,
    HttpStatus(u16),
}

/// What a transport gets to send for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub trigger: TriggerKind,
    /// Pre-built body for HTTP/S3, already chosen by the action.
    pub body: Option<&'a [u8]>,
    pub content_type: &'a str,
    /// Object key for uploads, message text for SMS/MMS.
    pub text: Option<&'a str>,
}

pub trait Transport<S>: Send + Sync {
    fn send(&self, spec: &S, delivery: &Delivery<'_>) -> Result<Delivered, DeliveryError>;
}

/// The set of transports available to the dispatcher. Kinds without a
/// transport fail permanently.
#[derive(Clone, Default)]
pub struct Transports {
    pub http: Option<Arc<dyn Transport<HttpAction>>>,
    pub aws_s3: Option<Arc<dyn Transport<AwsS3Action>>>,
    pub phone_call: Option<Arc<dyn Transport<PhoneCallAction>>>,
    pub phone_sms: Option<Arc<dyn Transport<PhoneSmsAction>>>,
    pub phone_mms: Option<Arc<dyn Transport<PhoneMmsAction>>>,
}

impl Transports {
    pub fn empty() -> Self {
        Self::default()
    }

    /// HTTP over reqwest; the other kinds have to be plugged in by the host.
    pub fn with_default_http() -> Result<Self, DeliveryError> {
        Ok(Self::empty().with_http(Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_http(mut self, t: Arc<dyn Transport<HttpAction>>) -> Self {
        self.http = Some(t);
        self
    }

    pub fn with_aws_s3(mut self, t: Arc<dyn Transport<AwsS3Action>>) -> Self {
        self.aws_s3 = Some(t);
        self
    }

    pub fn with_phone_call(mut self, t: Arc<dyn Transport<PhoneCallAction>>) -> Self {
        self.phone_call = Some(t);
        self
    }

    pub fn with_phone_sms(mut self, t: Arc<dyn Transport<PhoneSmsAction>>) -> Self {
        self.phone_sms = Some(t);
        self
    }

    pub fn with_phone_mms(mut self, t: Arc<dyn Transport<PhoneMmsAction>>) -> Self {
        self.phone_mms = Some(t);
        self
    }
}

/// Blocking HTTP transport. Only GET and POST reach it.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .user_agent(concat!("guard_lib/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DeliveryError::Permanent(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Transport<HttpAction> for ReqwestTransport {
    fn send(&self, spec: &HttpAction, delivery: &Delivery<'_>) -> Result<Delivered, DeliveryError> {
        let method = match spec.method.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            other => {
                return Err(DeliveryError::Permanent(format!(
                    "unsupported HTTP method \"{}\"",
                    other
                )))
            }
        };

        let mut request = self.client.request(method.clone(), &spec.url);
        for header in &spec.headers {
            request = request.header(header.name.as_str(), header.value.as_str());
        }
        if method == Method::POST {
            request = request
                .header(reqwest::header::CONTENT_TYPE, delivery.content_type)
                .body(delivery.body.map(<[u8]>::to_vec).unwrap_or_default());
        }

        let response = request.send().map_err(|e| {
            if e.is_builder() {
                DeliveryError::Permanent(e.to_string())
            } else {
                DeliveryError::Transient(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        info!("HTTP action \"{}\" got response: {}", spec.id, status);
        Ok(Delivered::HttpStatus(status))
    }
}
