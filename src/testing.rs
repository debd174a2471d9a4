//! Test doubles for the transport and decoder capabilities.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::StrategyError;
use crate::images::{ImageDecoder, RasterDecoder, payload};
use crate::models::{DecodedImage, ImageMetadata, PayloadFormat};
use crate::transport::{FetchRequest, FetchResponse, Transport};

/// Encode a solid PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

#[derive(Default)]
struct Script {
    responses: HashMap<String, VecDeque<Result<FetchResponse, StrategyError>>>,
    calls: Vec<(String, Instant)>,
    delay: Duration,
}

/// Transport answering from a per-URL script.
///
/// Each URL has a queue of outcomes; the last one repeats forever. Unknown
/// URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: Vec<u8>) {
        self.push(
            url,
            Ok(FetchResponse {
                status,
                content_type: None,
                body,
            }),
        );
    }

    pub fn fail(&self, url: &str, error: StrategyError) {
        self.push(url, Err(error));
    }

    fn push(&self, url: &str, outcome: Result<FetchResponse, StrategyError>) {
        self.script
            .lock()
            .unwrap()
            .responses
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = delay;
    }

    pub fn calls(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, StrategyError> {
        let (delay, outcome) = {
            let mut script = self.script.lock().unwrap();
            script.calls.push((request.url.clone(), Instant::now()));
            let outcome = match script.responses.get_mut(&request.url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) => queue.front().cloned().unwrap(),
                None => Ok(FetchResponse {
                    status: 404,
                    content_type: None,
                    body: Vec::new(),
                }),
            };
            (script.delay, outcome)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}

/// Decoder that handles PNG for real and fakes DICOM as an 8x8 image
pub struct StubDecoder;

impl ImageDecoder for StubDecoder {
    fn decode(&self, bytes: &[u8], hint: Option<PayloadFormat>) -> Result<DecodedImage, StrategyError> {
        let format = match payload::sniff(bytes) {
            PayloadFormat::Unknown => hint.unwrap_or(PayloadFormat::Unknown),
            sniffed => sniffed,
        };
        match format {
            PayloadFormat::Dicom => Ok(DecodedImage::rgba8(8, 8, vec![0; 256]).with_metadata(
                ImageMetadata {
                    format: PayloadFormat::Dicom,
                    ..ImageMetadata::default()
                },
            )),
            PayloadFormat::Unknown => Err(StrategyError::Decode {
                message: "unrecognized bytes".to_string(),
            }),
            _ => RasterDecoder.decode(bytes, Some(format)),
        }
    }
}
