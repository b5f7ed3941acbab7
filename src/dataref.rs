//! Protocol-agnostic reference to a datum exchanged between services.

use base64::Engine;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("uri must not be empty"))]
    EmptyUri,

    #[snafu(display("size_bytes must be non-negative"))]
    NegativeSize,

    #[snafu(display("checksum must be algorithm:value format"))]
    MalformedChecksum,

    #[snafu(display("S3 URI must start with s3://"))]
    BadS3Uri,

    #[snafu(display("HTTP URI must start with http://"))]
    BadHttpUri,

    #[snafu(display("HTTPS URI must start with https://"))]
    BadHttpsUri,

    #[snafu(display("NFS URI must be host:path format"))]
    BadNfsUri,

    #[snafu(display("MQTT URI must start with mqtt:// or mqtts://"))]
    BadMqttUri,

    #[snafu(display("INLINE uri must be valid base64"))]
    BadInlineUri,

    #[snafu(display("get_inline_data only valid for INLINE protocol"))]
    NotInline,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    S3,
    Http,
    Https,
    Nfs,
    Grpc,
    Mqtt,
    Villas,
    Inline,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Json,
    Csv,
    Parquet,
    Protobuf,
    Binary,
    Xml,
}

/// Protocol-agnostic, immutable pointer to one datum. The engine moves these
/// around; it never reads or transforms the bytes they point to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReference {
    pub protocol: Protocol,
    pub uri: String,
    pub format: Format,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DataReference {
    /// Validating constructor — mirrors the field/model validators of the
    /// source implementation's pydantic `DataReference`.
    pub fn new(
        protocol: Protocol,
        uri: impl Into<String>,
        format: Format,
        schema_uri: Option<String>,
        size_bytes: Option<i64>,
        checksum: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<Self> {
        let uri = uri.into();
        ensure!(!uri.trim().is_empty(), EmptyUriSnafu);

        if let Some(size) = size_bytes {
            ensure!(size >= 0, NegativeSizeSnafu);
        }

        if let Some(sum) = &checksum {
            let (alg, val) = sum.split_once(':').context(MalformedChecksumSnafu)?;
            ensure!(!alg.is_empty() && !val.is_empty(), MalformedChecksumSnafu);
        }

        validate_uri_for_protocol(protocol, &uri)?;

        Ok(Self {
            protocol,
            uri,
            format,
            schema_uri,
            size_bytes,
            checksum,
            metadata,
        })
    }

    /// Build an INLINE reference directly from bytes, base64-encoding them.
    pub fn from_inline_data(data: &[u8], format: Format) -> Self {
        let uri = base64::engine::general_purpose::STANDARD.encode(data);
        Self {
            protocol: Protocol::Inline,
            uri,
            format,
            schema_uri: None,
            size_bytes: Some(data.len() as i64),
            checksum: None,
            metadata: HashMap::new(),
        }
    }

    /// Decode the inline payload. Only valid for `Protocol::Inline`.
    pub fn get_inline_data(&self) -> Result<Vec<u8>> {
        ensure!(self.protocol == Protocol::Inline, NotInlineSnafu);
        base64::engine::general_purpose::STANDARD
            .decode(&self.uri)
            .map_err(|_| Error::BadInlineUri)
    }
}

fn validate_uri_for_protocol(protocol: Protocol, uri: &str) -> Result<()> {
    match protocol {
        Protocol::S3 => ensure!(uri.starts_with("s3://"), BadS3UriSnafu),
        Protocol::Http => ensure!(uri.starts_with("http://"), BadHttpUriSnafu),
        Protocol::Https => ensure!(uri.starts_with("https://"), BadHttpsUriSnafu),
        Protocol::Nfs => ensure!(uri.contains(':'), BadNfsUriSnafu),
        Protocol::Mqtt => ensure!(
            uri.starts_with("mqtt://") || uri.starts_with("mqtts://"),
            BadMqttUriSnafu
        ),
        Protocol::Inline => {
            base64::engine::general_purpose::STANDARD
                .decode(uri)
                .map_err(|_| Error::BadInlineUri)?;
        }
        Protocol::Grpc | Protocol::Villas | Protocol::File => {}
    }
    Ok(())
}
