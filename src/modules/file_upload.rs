//! File upload protection: dangerous names, web-shell payloads and
//! double-extension tricks in multipart bodies.

use lazy_static::lazy_static;
use regex::bytes;
use regex::{Regex, RegexBuilder};
use serde_json::json;

use crate::core::journal::clip;
use crate::models::Decision;

use super::{skipped_response, DetectionModule, ModuleInput};

const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Byte signatures of common web shells and code droppers.
const SHELL_SIGNATURES: [&[u8]; 21] = [
    b"<?php",
    b"<%",
    b"<script",
    b"eval(",
    b"base64_decode",
    b"system(",
    b"exec(",
    b"passthru(",
    b"shell_exec",
    b"proc_open",
    b"popen(",
    b"curl_exec",
    b"curl_multi_exec",
    b"assert(",
    b"create_function",
    b"file_get_contents",
    b"file_put_contents",
    b"fopen(",
    b"readfile(",
    b"require(",
    b"include(",
];

lazy_static! {
    /// Extensions a server might execute or interpret.
    static ref DANGEROUS_EXTENSIONS: Vec<(&'static str, Regex)> = [
        r"\.php\d?$", r"\.phtml$", r"\.php\d\.suspected$",
        r"\.asp$", r"\.aspx$", r"\.asa$", r"\.cer$", r"\.cdx$",
        r"\.jsp$", r"\.jspx$", r"\.jsw$", r"\.jsv$",
        r"\.exe$", r"\.dll$", r"\.bat$", r"\.cmd$", r"\.com$",
        r"\.scr$", r"\.vbs$", r"\.js$", r"\.jar$",
        r"\.sh$", r"\.bash$", r"\.py$", r"\.pl$", r"\.rb$",
        r"\.cgi$", r"\.htaccess$", r"\.htpasswd$",
        r"\.war$", r"\.ear$", r"\.swf$", r"\.svg$",
    ]
    .iter()
    .map(|p| {
        (
            *p,
            RegexBuilder::new(p)
                .case_insensitive(true)
                .build()
                .expect("embedded pattern must compile"),
        )
    })
    .collect();

    static ref FILENAME_RE: bytes::Regex =
        bytes::Regex::new(r#"filename="([^"]+)""#).expect("embedded pattern must compile");

    static ref DOUBLE_EXTENSION_RE: bytes::Regex =
        bytes::Regex::new(r"(?i)\.(?:jpg|png|gif|txt|pdf)\.(?:php|asp|jsp|exe)")
            .expect("embedded pattern must compile");
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Scans multipart upload bodies for hostile content.
pub struct FileUploadProtection;

impl DetectionModule for FileUploadProtection {
    fn name(&self) -> &'static str {
        "FileUploadProtection"
    }

    fn run(&self, input: &ModuleInput) -> Decision {
        if input.request.phase.is_response() {
            return skipped_response();
        }

        let request = &input.request;
        let method = request.method.to_uppercase();
        if !matches!(method.as_str(), "POST" | "PUT") {
            return Decision::allow(json!("not_upload_request"));
        }
        if !request.headers.to_lowercase().contains("multipart/form-data") {
            return Decision::allow(json!("not_file_upload"));
        }

        let body = &request.body_bytes;
        if body.len() > MAX_UPLOAD_SIZE {
            return Decision::block(
                format!("File upload too large: {} bytes", body.len()),
                json!({"size": body.len(), "limit": MAX_UPLOAD_SIZE}),
            );
        }

        if let Some(capture) = FILENAME_RE.captures(body).and_then(|c| c.get(1)) {
            let filename = String::from_utf8_lossy(capture.as_bytes()).into_owned();

            for (pattern, regex) in DANGEROUS_EXTENSIONS.iter() {
                if regex.is_match(&filename) {
                    return Decision::block(
                        format!("Dangerous file extension detected: {filename}"),
                        json!({"filename": filename, "matched_pattern": pattern}),
                    );
                }
            }

            if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
                return Decision::block(
                    "Path traversal detected in filename",
                    json!({"filename": filename}),
                );
            }
        }

        for signature in SHELL_SIGNATURES {
            if contains(body, signature) {
                return Decision::block(
                    "Web shell or malicious code detected in upload",
                    json!({"signature": clip(&String::from_utf8_lossy(signature), 50)}),
                );
            }
        }

        if DOUBLE_EXTENSION_RE.is_match(body) {
            return Decision::block(
                "Double extension attack detected",
                json!({"pattern": "double_extension"}),
            );
        }

        Decision::allow(json!({"file_upload_check": "passed"}))
    }
}
