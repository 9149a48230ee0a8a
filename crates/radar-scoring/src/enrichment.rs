//! Chat-completion enrichment of gated (item, product) pairs.

use std::time::Duration;

use async_trait::async_trait;
use radar_core::{AppConfig, Enrichment, EnrichmentResult, ProductProfile, Urgency};
use serde_json::{json, Value};

use crate::error::EnrichError;

const SYSTEM_PROMPT: &str = "You review community discussion threads for a product team. \
Decide whether the thread shows a real pain point the product could address, how urgent it is \
for the author, and whether the thread is itself a thin advertisement or spam. Authors sharing \
specific struggles or learnings are genuine even if they mention their own project; flag spam only \
when the post offers nothing beyond a pitch or link.\n\n\
Respond with a JSON object with exactly these fields: \
pain_point_summary (string), urgency (\"low\", \"medium\" or \"high\"), \
relevance (number from 0 to 10), is_spam_or_ad (bool), spam_indicators (list of strings).";

/// Produces a structured assessment of one thread for one product.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn analyze(
        &self,
        context: &str,
        profile: &ProductProfile,
    ) -> Result<EnrichmentResult, EnrichError>;
}

/// OpenAI-compatible `/chat/completions` client in JSON mode.
pub struct ChatEnricher {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl ChatEnricher {
    /// # Errors
    ///
    /// Returns [`EnrichError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    /// # Errors
    ///
    /// Returns [`EnrichError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, EnrichError> {
        Self::new(
            &config.enrich_url,
            config.enrich_api_key.clone(),
            config.enrich_model.clone(),
            Duration::from_secs(config.enrich_timeout_secs),
        )
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Enricher for ChatEnricher {
    async fn analyze(
        &self,
        context: &str,
        profile: &ProductProfile,
    ) -> Result<EnrichmentResult, EnrichError> {
        let req_body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": format!(
                        "PRODUCT: {}\nDESCRIPTION: {}\n\nTHREAD TO ANALYZE:\n{}",
                        profile.name, profile.description, context
                    )
                }
            ],
            "temperature": 0
        });

        let mut request = self.client.post(&self.url).json(&req_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::Status {
                status: status.as_u16(),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EnrichError::Malformed(format!("response body: {e}")))?;
        let content = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|msg| msg.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| EnrichError::Malformed("missing choices[0].message.content".into()))?;

        parse_assessment(content)
    }
}

/// Validate the model's JSON answer.
///
/// `pain_point_summary`, `urgency` and `relevance` are required. Relevance
/// must be a finite number and is clamped to `[0, 10]`. The spam fields
/// default to "not spam".
///
/// # Errors
///
/// Returns [`EnrichError::Malformed`] when the content is not a JSON object
/// or a required field is missing or has the wrong shape.
pub fn parse_assessment(content: &str) -> Result<EnrichmentResult, EnrichError> {
    let parsed: Value = serde_json::from_str(content)
        .map_err(|e| EnrichError::Malformed(format!("content is not JSON: {e}")))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| EnrichError::Malformed("content is not a JSON object".into()))?;

    let pain_point_summary = obj
        .get("pain_point_summary")
        .and_then(Value::as_str)
        .ok_or_else(|| EnrichError::Malformed("pain_point_summary missing".into()))?
        .trim()
        .to_string();

    let urgency = match obj
        .get("urgency")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("low") => Urgency::Low,
        Some("medium") => Urgency::Medium,
        Some("high") => Urgency::High,
        other => {
            return Err(EnrichError::Malformed(format!(
                "urgency must be low, medium or high, got {other:?}"
            )))
        }
    };

    let relevance = obj
        .get("relevance")
        .and_then(Value::as_f64)
        .filter(|r| r.is_finite())
        .ok_or_else(|| EnrichError::Malformed("relevance missing or not a number".into()))?
        .clamp(0.0, 10.0);

    let is_spam = match obj.get("is_spam_or_ad") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(EnrichError::Malformed(format!(
                "is_spam_or_ad must be a bool, got {other}"
            )))
        }
    };

    let spam_indicators = match obj.get("spam_indicators") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(other) => {
            return Err(EnrichError::Malformed(format!(
                "spam_indicators must be a list, got {other}"
            )))
        }
    };

    Ok(EnrichmentResult {
        pain_point_summary,
        urgency,
        relevance,
        is_spam,
        spam_indicators,
    })
}

/// Run one enrichment call under a hard deadline.
///
/// Never fails: transport errors, bad statuses, malformed answers and
/// timeouts all come back as [`Enrichment::Error`].
pub async fn enrich_with_timeout(
    enricher: &dyn Enricher,
    context: &str,
    profile: &ProductProfile,
    timeout: Duration,
) -> Enrichment {
    let outcome = match tokio::time::timeout(timeout, enricher.analyze(context, profile)).await {
        Ok(result) => result,
        Err(_) => Err(EnrichError::Timeout {
            secs: timeout.as_secs(),
        }),
    };
    match outcome {
        Ok(result) => Enrichment::Result(result),
        Err(e) => {
            tracing::warn!(
                tenant_id = %profile.tenant_id,
                product_id = %profile.product_id,
                error = %e,
                "enrichment failed"
            );
            Enrichment::Error {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn profile() -> ProductProfile {
        ProductProfile {
            tenant_id: "acme".to_string(),
            product_id: "profit-doctor".to_string(),
            name: "ProfitDoctor".to_string(),
            description: "Profit tracking for Shopify merchants".to_string(),
            pain_keywords: vec![],
            intent_keywords: vec![],
            categories: vec![],
        }
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    const GOOD: &str = r#"{
        "pain_point_summary": "Cannot see true margins after ad spend",
        "urgency": "High",
        "relevance": 8.5,
        "is_spam_or_ad": false,
        "spam_indicators": []
    }"#;

    #[test]
    fn parses_well_formed_answer() {
        let r = parse_assessment(GOOD).unwrap();
        assert_eq!(r.urgency, Urgency::High);
        assert!((r.relevance - 8.5).abs() < f64::EPSILON);
        assert!(!r.is_spam);
        assert_eq!(r.pain_point_summary, "Cannot see true margins after ad spend");
    }

    #[test]
    fn clamps_relevance_into_scale() {
        let r = parse_assessment(
            r#"{"pain_point_summary":"x","urgency":"low","relevance":42,"is_spam_or_ad":true,"spam_indicators":["link only"]}"#,
        )
        .unwrap();
        assert!((r.relevance - 10.0).abs() < f64::EPSILON);
        assert!(r.is_spam);
        assert_eq!(r.spam_indicators, vec!["link only".to_string()]);
    }

    #[test]
    fn rejects_malformed_answers() {
        for bad in [
            "not json",
            "[1,2]",
            r#"{"urgency":"low","relevance":3}"#,
            r#"{"pain_point_summary":"x","urgency":"urgent","relevance":3}"#,
            r#"{"pain_point_summary":"x","urgency":"low","relevance":"high"}"#,
            r#"{"pain_point_summary":"x","urgency":"low","relevance":3,"is_spam_or_ad":"no"}"#,
        ] {
            assert!(
                matches!(parse_assessment(bad), Err(EnrichError::Malformed(_))),
                "accepted {bad}"
            );
        }
    }

    #[tokio::test]
    async fn posts_json_mode_request_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "response_format": { "type": "json_object" },
                "temperature": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(GOOD)))
            .expect(1)
            .mount(&server)
            .await;

        let enricher = ChatEnricher::new(
            &format!("{}/v1/", server.uri()),
            Some("sk-test".to_string()),
            "gpt-4o-mini",
            Duration::from_secs(5),
        )
        .unwrap();
        let result = enricher.analyze("TITLE: margins", &profile()).await.unwrap();
        assert_eq!(result.urgency, Urgency::High);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let enricher =
            ChatEnricher::new(&server.uri(), None, "m", Duration::from_secs(5)).unwrap();
        let err = enricher.analyze("ctx", &profile()).await.unwrap_err();
        assert!(matches!(err, EnrichError::Status { status: 500 }));
    }

    #[tokio::test]
    async fn missing_content_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let enricher =
            ChatEnricher::new(&server.uri(), None, "m", Duration::from_secs(5)).unwrap();
        let outcome = enrich_with_timeout(&enricher, "ctx", &profile(), Duration::from_secs(5)).await;
        assert!(matches!(outcome, Enrichment::Error { .. }));
    }

    #[tokio::test]
    async fn slow_service_times_out_into_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion(GOOD))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let enricher =
            ChatEnricher::new(&server.uri(), None, "m", Duration::from_secs(30)).unwrap();
        let outcome =
            enrich_with_timeout(&enricher, "ctx", &profile(), Duration::from_millis(100)).await;
        match outcome {
            Enrichment::Error { message } => assert!(message.contains("timed out"), "{message}"),
            other => panic!("expected error payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_becomes_result_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(GOOD)))
            .mount(&server)
            .await;

        let enricher =
            ChatEnricher::new(&server.uri(), None, "m", Duration::from_secs(5)).unwrap();
        let outcome = enrich_with_timeout(&enricher, "ctx", &profile(), Duration::from_secs(5)).await;
        assert!(matches!(outcome, Enrichment::Result(_)));
    }
}
