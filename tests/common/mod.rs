//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use wiremock::{Request, Respond, ResponseTemplate};

use ziplens::{DosDateTime, ZipWriter};

/// Serve a byte blob with real Range semantics.
///
/// A `Range: bytes=a-b` request gets a 206 slice with `Content-Range`;
/// anything else gets the full blob with a 200.
pub struct RangeResponder {
    data: Vec<u8>,
}

impl RangeResponder {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.data.len() as u64;
        let header = request.headers.get("range").and_then(|v| v.to_str().ok());

        let range = match header.and_then(|v| v.strip_prefix("bytes=")) {
            // Suffix form: the last n bytes
            Some(spec) if spec.starts_with('-') => spec[1..]
                .parse::<u64>()
                .ok()
                .map(|n| (total.saturating_sub(n), total - 1)),
            Some(spec) => parse_byte_range(spec),
            None => None,
        };

        match range {
            Some((start, end)) if start < total => {
                let end = end.min(total - 1);
                ResponseTemplate::new(206)
                    .insert_header(
                        "content-range",
                        format!("bytes {start}-{end}/{total}").as_str(),
                    )
                    .insert_header("accept-ranges", "bytes")
                    .set_body_bytes(self.data[start as usize..=end as usize].to_vec())
            }
            _ => ResponseTemplate::new(200).set_body_bytes(self.data.clone()),
        }
    }
}

/// Serve the full blob with 200 no matter what, ignoring Range headers.
pub struct IgnoresRanges {
    data: Vec<u8>,
}

impl IgnoresRanges {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Respond for IgnoresRanges {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_bytes(self.data.clone())
    }
}

/// Serve a 206 only for the one-byte probe range; every other request
/// gets the full blob with 200. Models origins that advertise range
/// support and then withdraw it.
pub struct ProbeOnlyRanges {
    data: Vec<u8>,
}

impl ProbeOnlyRanges {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Respond for ProbeOnlyRanges {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let header = request.headers.get("range").and_then(|v| v.to_str().ok());
        if header == Some("bytes=0-0") {
            ResponseTemplate::new(206)
                .insert_header(
                    "content-range",
                    format!("bytes 0-0/{}", self.data.len()).as_str(),
                )
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(self.data[..1].to_vec())
        } else {
            ResponseTemplate::new(200).set_body_bytes(self.data.clone())
        }
    }
}

fn parse_byte_range(spec: &str) -> Option<(u64, u64)> {
    let (left, right) = spec.split_once('-')?;
    Some((left.parse().ok()?, right.parse().ok()?))
}

pub fn stamp() -> DosDateTime {
    DosDateTime {
        year: 2024,
        month: 6,
        day: 1,
        hour: 9,
        minute: 30,
        second: 0,
    }
}

/// A small mixed archive: a directory, text files, and a poorly
/// compressible blob that keeps the archive bigger than the EOCD search
/// window so range-parse economics are observable.
pub fn sample_archive() -> Vec<u8> {
    let mut writer = ZipWriter::new();
    writer.add_directory("src", stamp()).unwrap();
    writer
        .add_file("src/main.rs", b"fn main() {\n    println!(\"hi\");\n}\n", stamp())
        .unwrap();
    writer
        .add_file("README.md", b"# sample project\n", stamp())
        .unwrap();
    writer
        .add_file("assets/noise.bin", &pseudo_random(200_000), stamp())
        .unwrap();
    writer.finish().unwrap()
}

/// Deterministic noise; compresses poorly on purpose.
pub fn pseudo_random(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_4f6c_dd1du64;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((state >> 33) as u8);
    }
    out
}
