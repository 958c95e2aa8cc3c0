//! Utilities for working with `labform`.
use std::io::Write;

use anyhow::Context;

/// Returns the sha256 digest of `bytes`, base64 encoded.
///
/// This is the format AWS Lambda reports a function's `CodeSha256` in.
pub fn sha256_base64(bytes: &[u8]) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, bytes);
    data_encoding::BASE64.encode(digest.as_ref())
}

/// Packs `(file name, contents)` pairs into a deflate-compressed zip
/// archive held in memory.
pub fn zip_sources<'a>(
    files: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> anyhow::Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);
    for (name, contents) in files {
        log::trace!("zipping {name} ({} bytes)", contents.len());
        writer
            .start_file(name, options)
            .with_context(|| format!("could not add {name} to archive"))?;
        writer.write_all(contents.as_bytes())?;
    }
    let bytes = writer.finish().context("could not finish archive")?.into_inner();
    log::debug!("zipped sources into {} bytes", bytes.len());
    Ok(bytes)
}

/// Returns the resource name at the end of an ARN.
///
/// `arn:aws:iam::123:role/service-role/foo` gives `foo`,
/// `arn:aws:sqs:us-east-1:123:queue` gives `queue`.
pub fn name_from_arn(arn: &str) -> &str {
    let resource = arn.splitn(6, ':').nth(5).unwrap_or(arn);
    resource.rsplit(['/', ':']).next().unwrap_or(resource)
}

/// ARN of a customer managed policy in `account`.
pub fn customer_policy_arn(account: &str, name: &str) -> String {
    format!("arn:aws:iam::{account}:policy/{name}")
}

/// ARN of an AWS managed policy, e.g. `service-role/AWSLambdaBasicExecutionRole`.
pub fn managed_policy_arn(name: &str) -> String {
    format!("arn:aws:iam::aws:policy/{name}")
}

#[cfg(test)]
mod test {
    use std::io::Read;

    use super::*;

    #[test]
    fn sha256_matches_lambda_format() {
        assert_eq!(
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=",
            sha256_base64(b"")
        );
    }

    #[test]
    fn zip_round_trips_sources() {
        let bytes = zip_sources([("handler.py", "def handler(e, c):\n    return e\n")]).unwrap();
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
        assert_eq!(1, archive.len());
        let mut file = archive.by_name("handler.py").unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!("def handler(e, c):\n    return e\n", contents);
    }

    #[test]
    fn arn_names() {
        assert_eq!("foo", name_from_arn("arn:aws:iam::123:role/service-role/foo"));
        assert_eq!("POC1-Queue", name_from_arn("arn:aws:sqs:us-east-1:123:POC1-Queue"));
        assert_eq!(
            "POC1-Topic",
            name_from_arn("arn:aws:sns:us-east-1:123:POC1-Topic")
        );
        assert_eq!("plain", name_from_arn("plain"));
        assert_eq!(
            "arn:aws:iam::123456789012:policy/POC1-Lambda-SNS-Publish",
            customer_policy_arn("123456789012", "POC1-Lambda-SNS-Publish")
        );
        assert_eq!(
            "arn:aws:iam::aws:policy/service-role/AmazonAPIGatewayPushToCloudWatchLogs",
            managed_policy_arn("service-role/AmazonAPIGatewayPushToCloudWatchLogs")
        );
    }
}
