//! Ordered strategy chain.
//!
//! Each [`StrategyKind`] is one way of turning an identifier into pixels. The
//! chain tries them strictly in order; a failure is logged and the next one
//! runs. Only when every strategy has failed does the chain fail, carrying
//! all per-strategy errors.

pub mod transcode;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AcquisitionConfig;
use crate::error::{AcquisitionError, StrategyError, StrategyFailure};
use crate::images::{ImageDecoder, payload};
use crate::models::{DecodedImage, ImageIdentifier, PayloadFormat, Scheme};
use crate::transport::{FetchRequest, FetchResponse, Transport};

/// Acquisition strategies, in their default order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyKind {
    /// Hand the raw object to the decoder backend
    #[serde(rename = "primary-decoder")]
    PrimaryDecoder,
    /// Fetch, inspect the container, then decode
    #[serde(rename = "direct-fetch-and-parse")]
    DirectFetch,
    /// Let the server render the object to PNG
    #[serde(rename = "server-transcode")]
    ServerTranscode,
    /// Ask for a rendered raster (JPEG/PNG) variant
    #[serde(rename = "generic-image-fallback")]
    GenericImage,
}

impl StrategyKind {
    /// Get all strategies in default order
    pub const fn all() -> &'static [Self] {
        &[
            Self::PrimaryDecoder,
            Self::DirectFetch,
            Self::ServerTranscode,
            Self::GenericImage,
        ]
    }

    /// Get the config/log name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PrimaryDecoder => "primary-decoder",
            Self::DirectFetch => "direct-fetch-and-parse",
            Self::ServerTranscode => "server-transcode",
            Self::GenericImage => "generic-image-fallback",
        }
    }

    /// Parse from a config/log name
    pub fn from_name(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.name() == s)
    }

    /// Whether the strategy depends on server-side work (longer deadline)
    pub const fn is_server_assisted(&self) -> bool {
        matches!(self, Self::ServerTranscode)
    }

    /// Run this strategy once.
    pub async fn attempt(
        &self,
        ctx: &StrategyContext,
        id: &ImageIdentifier,
        timeout: Duration,
    ) -> Result<DecodedImage, StrategyError> {
        match self {
            Self::PrimaryDecoder => primary_decoder(ctx, id, timeout).await,
            Self::DirectFetch => direct_fetch(ctx, id, timeout).await,
            Self::ServerTranscode => server_transcode(ctx, id, timeout).await,
            Self::GenericImage => generic_image(ctx, id, timeout).await,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Collaborators and settings shared by every strategy
#[derive(Clone)]
pub struct StrategyContext {
    transport: Arc<dyn Transport>,
    decoder: Arc<dyn ImageDecoder>,
    timeout: Duration,
    server_timeout: Duration,
    server_base_url: Option<String>,
    unsupported_transfer_syntaxes: Vec<String>,
}

impl StrategyContext {
    /// Create a context from config
    pub fn new(
        config: &AcquisitionConfig,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        Self {
            transport,
            decoder,
            timeout: config.timeout(),
            server_timeout: config.server_timeout(),
            server_base_url: config.server_base_url.clone(),
            unsupported_transfer_syntaxes: config.unsupported_transfer_syntaxes.clone(),
        }
    }

    /// Default deadline for one attempt of `kind`
    pub const fn timeout_for(&self, kind: StrategyKind) -> Duration {
        if kind.is_server_assisted() {
            self.server_timeout
        } else {
            self.timeout
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, StrategyError> {
        let response = self.transport.fetch(request).await?.error_for_status()?;
        if response.body.is_empty() {
            return Err(StrategyError::Decode {
                message: "empty response body".to_string(),
            });
        }
        Ok(response)
    }
}

async fn primary_decoder(
    ctx: &StrategyContext,
    id: &ImageIdentifier,
    timeout: Duration,
) -> Result<DecodedImage, StrategyError> {
    let (accept, hint) = if id.scheme().is_dicom() {
        ("application/dicom", Some(PayloadFormat::Dicom))
    } else {
        ("image/*", None)
    };

    let response = ctx
        .fetch(FetchRequest::get(id.url(), timeout).accept(accept))
        .await?;
    let mut image = ctx.decoder.decode(&response.body, hint)?;
    image.metadata.encoded_bytes = response.body.len() as u64;
    Ok(image)
}

async fn direct_fetch(
    ctx: &StrategyContext,
    id: &ImageIdentifier,
    timeout: Duration,
) -> Result<DecodedImage, StrategyError> {
    let response = ctx
        .fetch(FetchRequest::get(id.url(), timeout).accept("*/*"))
        .await?;

    let format = payload::sniff(&response.body);
    let transfer_syntax = match format {
        PayloadFormat::Dicom => {
            let syntax = payload::transfer_syntax(&response.body);
            if let Some(uid) = syntax.as_deref()
                && payload::is_unsupported_syntax(uid, &ctx.unsupported_transfer_syntaxes)
            {
                return Err(StrategyError::Unsupported {
                    reason: format!("transfer syntax {uid}"),
                });
            }
            syntax
        }
        PayloadFormat::Unknown => {
            return Err(StrategyError::Unsupported {
                reason: format!(
                    "unrecognized payload ({})",
                    response.content_type.as_deref().unwrap_or("no content type")
                ),
            });
        }
        _ => None,
    };

    let mut image = ctx.decoder.decode(&response.body, Some(format))?;
    image.metadata.format = format;
    image.metadata.encoded_bytes = response.body.len() as u64;
    if transfer_syntax.is_some() {
        image.metadata.transfer_syntax = transfer_syntax;
    }
    Ok(image)
}

async fn server_transcode(
    ctx: &StrategyContext,
    id: &ImageIdentifier,
    timeout: Duration,
) -> Result<DecodedImage, StrategyError> {
    let Some(base) = ctx.server_base_url.as_deref() else {
        return Err(StrategyError::Unavailable {
            reason: "no transcode server configured".to_string(),
        });
    };

    let response = ctx
        .fetch(
            FetchRequest::get(transcode::slices_url(base, id.url()), timeout)
                .accept("application/json"),
        )
        .await?;

    let envelope = transcode::TranscodeResponse::parse(&response.body)?;
    let png = envelope.first_slice()?;

    let mut image = ctx.decoder.decode(&png, Some(PayloadFormat::Png))?;
    image.metadata.format = PayloadFormat::Png;
    image.metadata.encoded_bytes = png.len() as u64;
    image.metadata.frames = envelope.total_slices().or(image.metadata.frames);
    image.metadata.extra.extend(envelope.header_fields());
    Ok(image)
}

/// URL of a server-rendered raster for `id`
pub fn rendered_url(id: &ImageIdentifier) -> String {
    let url = id.url();
    match id.scheme() {
        Scheme::Dicomweb => match url.split_once('?') {
            Some((path, query)) => format!("{path}/rendered?{query}"),
            None => format!("{url}/rendered"),
        },
        Scheme::Wadouri if url.contains("contentType=") => url.to_string(),
        Scheme::Wadouri => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}contentType=image%2Fjpeg")
        }
        Scheme::Web => url.to_string(),
    }
}

async fn generic_image(
    ctx: &StrategyContext,
    id: &ImageIdentifier,
    timeout: Duration,
) -> Result<DecodedImage, StrategyError> {
    let response = ctx
        .fetch(FetchRequest::get(rendered_url(id), timeout).accept("image/*"))
        .await?;

    let format = payload::sniff(&response.body);
    if format == PayloadFormat::Dicom {
        return Err(StrategyError::Unsupported {
            reason: "server returned DICOM for a rendered request".to_string(),
        });
    }

    let hint = (format != PayloadFormat::Unknown).then_some(format);
    let mut image = ctx.decoder.decode(&response.body, hint)?;
    image.metadata.encoded_bytes = response.body.len() as u64;
    Ok(image)
}

/// The ordered list of strategies plus their shared context
#[derive(Clone)]
pub struct StrategyChain {
    strategies: Vec<StrategyKind>,
    context: StrategyContext,
}

impl StrategyChain {
    /// Create a chain
    pub const fn new(strategies: Vec<StrategyKind>, context: StrategyContext) -> Self {
        Self {
            strategies,
            context,
        }
    }

    /// Create the configured chain
    pub fn from_config(
        config: &AcquisitionConfig,
        transport: Arc<dyn Transport>,
        decoder: Arc<dyn ImageDecoder>,
    ) -> Self {
        Self::new(
            config.strategies.clone(),
            StrategyContext::new(config, transport, decoder),
        )
    }

    /// Strategies in the order they are tried
    pub fn strategies(&self) -> &[StrategyKind] {
        &self.strategies
    }

    /// Try each strategy in order until one yields an image.
    ///
    /// `timeout` overrides every strategy's default deadline. Cancellation
    /// aborts the running attempt and skips the remaining strategies.
    pub async fn load(
        &self,
        id: &ImageIdentifier,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<DecodedImage, AcquisitionError> {
        if self.strategies.is_empty() {
            return Err(AcquisitionError::NoStrategies);
        }

        let mut failures = Vec::with_capacity(self.strategies.len());

        for kind in &self.strategies {
            let deadline = timeout.unwrap_or_else(|| self.context.timeout_for(*kind));
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(StrategyError::Cancelled),
                outcome = tokio::time::timeout(deadline, kind.attempt(&self.context, id, deadline)) => {
                    outcome.unwrap_or_else(|_| Err(StrategyError::Timeout {
                        after_ms: deadline.as_millis() as u64,
                    }))
                }
            };

            match result {
                Ok(mut image) => {
                    tracing::debug!(
                        "{kind} loaded {id} in {}ms",
                        started.elapsed().as_millis()
                    );
                    image.metadata.strategy = Some(*kind);
                    return Ok(image);
                }
                Err(StrategyError::Cancelled) => {
                    return Err(AcquisitionError::Cancelled {
                        identifier: id.clone(),
                    });
                }
                Err(error) => {
                    tracing::debug!("{kind} failed for {id}: {error}");
                    failures.push(StrategyFailure {
                        strategy: *kind,
                        error,
                    });
                }
            }
        }

        tracing::warn!("All strategies failed for {id}");
        Err(AcquisitionError::from_failures(id, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, StubDecoder, png_bytes};

    fn chain(transport: &Arc<ScriptedTransport>, strategies: &[StrategyKind]) -> StrategyChain {
        let config = AcquisitionConfig {
            server_base_url: Some("http://transcoder.local".to_string()),
            ..AcquisitionConfig::default()
        };
        StrategyChain::new(
            strategies.to_vec(),
            StrategyContext::new(&config, transport.clone(), Arc::new(StubDecoder)),
        )
    }

    fn wado() -> ImageIdentifier {
        ImageIdentifier::parse("wadouri:https://pacs.example/wado?objectUID=1.2.3").unwrap()
    }

    #[test]
    fn test_names_round_trip() {
        for kind in StrategyKind::all() {
            assert_eq!(StrategyKind::from_name(kind.name()), Some(*kind));
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.name()));
        }
    }

    #[test]
    fn test_rendered_urls() {
        assert_eq!(
            rendered_url(&wado()),
            "https://pacs.example/wado?objectUID=1.2.3&contentType=image%2Fjpeg"
        );
        let rs = ImageIdentifier::parse("dicomweb:https://h/studies/1/series/2/instances/3").unwrap();
        assert_eq!(rendered_url(&rs), "https://h/studies/1/series/2/instances/3/rendered");
        let with_query =
            ImageIdentifier::parse("dicomweb:https://h/studies/1/series/2/instances/3?quality=90")
                .unwrap();
        assert_eq!(
            rendered_url(&with_query),
            "https://h/studies/1/series/2/instances/3/rendered?quality=90"
        );
    }

    #[tokio::test]
    async fn test_falls_through_to_next_strategy() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(wado().url(), 503, Vec::new());
        transport.respond(&rendered_url(&wado()), 200, png_bytes(2, 2));

        let chain = chain(
            &transport,
            &[StrategyKind::PrimaryDecoder, StrategyKind::GenericImage],
        );
        let image = chain
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.metadata.strategy, Some(StrategyKind::GenericImage));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_all_failures_are_aggregated_in_order() {
        let transport = Arc::new(ScriptedTransport::new());
        let chain = chain(&transport, StrategyKind::all());

        let err = chain
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        let AcquisitionError::AllStrategiesFailed { failures, .. } = err else {
            panic!("expected aggregate failure, got {err:?}");
        };
        let order: Vec<_> = failures.iter().map(|f| f.strategy).collect();
        assert_eq!(order, StrategyKind::all());
        assert!(failures.iter().all(|f| f.error == StrategyError::Http { status: 404 }));
    }

    #[tokio::test]
    async fn test_unsupported_transfer_syntax_is_classified() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            wado().url(),
            200,
            payload::dicom_with_syntax("1.2.840.10008.1.2.4.90"),
        );

        let err = chain(&transport, &[StrategyKind::DirectFetch])
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::Decode { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_direct_fetch_records_transfer_syntax() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            wado().url(),
            200,
            payload::dicom_with_syntax("1.2.840.10008.1.2.1"),
        );

        let image = chain(&transport, &[StrategyKind::DirectFetch])
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(image.metadata.format, PayloadFormat::Dicom);
        assert_eq!(
            image.metadata.transfer_syntax.as_deref(),
            Some("1.2.840.10008.1.2.1")
        );
    }

    #[tokio::test]
    async fn test_server_transcode_decodes_first_slice() {
        use base64::Engine as _;

        let transport = Arc::new(ScriptedTransport::new());
        let envelope = serde_json::json!({
            "success": true,
            "metadata": { "modality": "MR", "total_slices": 12 },
            "slices": [{
                "slice_number": 0,
                "image_data": base64::engine::general_purpose::STANDARD.encode(png_bytes(4, 3)),
                "format": "PNG"
            }]
        });
        transport.respond(
            &transcode::slices_url("http://transcoder.local", wado().url()),
            200,
            envelope.to_string().into_bytes(),
        );

        let image = chain(&transport, &[StrategyKind::ServerTranscode])
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!((image.width, image.height), (4, 3));
        assert_eq!(image.metadata.frames, Some(12));
        assert_eq!(image.metadata.extra.get("modality").map(String::as_str), Some("MR"));
        assert_eq!(image.metadata.strategy, Some(StrategyKind::ServerTranscode));
    }

    #[tokio::test]
    async fn test_server_transcode_unavailable_without_server() {
        let transport = Arc::new(ScriptedTransport::new());
        let chain = StrategyChain::new(
            vec![StrategyKind::ServerTranscode],
            StrategyContext::new(
                &AcquisitionConfig::default(),
                transport.clone(),
                Arc::new(StubDecoder),
            ),
        );

        let err = chain
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategy_timeout_moves_on() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(wado().url(), 200, png_bytes(1, 1));
        transport.set_delay(Duration::from_secs(45));

        let chain = chain(&transport, &[StrategyKind::PrimaryDecoder]);
        let err = chain
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            err,
            AcquisitionError::Timeout {
                identifier: wado(),
                after_ms: 30_000
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let transport = Arc::new(ScriptedTransport::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = chain(&transport, StrategyKind::all())
            .load(&wado(), None, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AcquisitionError::Cancelled { .. }));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let transport = Arc::new(ScriptedTransport::new());
        let err = chain(&transport, &[])
            .load(&wado(), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, AcquisitionError::NoStrategies);
    }
}
