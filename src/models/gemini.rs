//! Gemini `generateContent` dialect types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// generateContent / streamGenerateContent request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(default)]
    pub system_instruction: Option<GeminiContent>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_config: Option<Value>,
    #[serde(default)]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<GeminiPart>,
}

/// A single part. Gemini parts are a union keyed by which field is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeminiPart {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData")]
    InlineData(InlineData),
    #[serde(rename = "functionCall")]
    FunctionCall(GeminiFunctionCall),
    #[serde(rename = "functionResponse")]
    FunctionResponse(GeminiFunctionResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiFunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: GeminiContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
    /// Metering value forwarded verbatim from the upstream `usage` event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits_used: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_parses_parts_union() {
        let req: GenerateContentRequest = serde_json::from_str(
            r#"{
                "systemInstruction": {"parts": [{"text": "be nice"}]},
                "contents": [
                    {"role": "user", "parts": [
                        {"text": "look"},
                        {"inlineData": {"mimeType": "image/png", "data": "AA=="}}
                    ]},
                    {"role": "model", "parts": [
                        {"functionCall": {"name": "lookup", "args": {"q": "x"}}}
                    ]},
                    {"role": "user", "parts": [
                        {"functionResponse": {"name": "lookup", "response": {"result": "found"}}}
                    ]}
                ],
                "generationConfig": {"maxOutputTokens": 64, "temperature": 0.5}
            }"#,
        )
        .unwrap();
        assert_eq!(req.contents.len(), 3);
        assert_eq!(
            req.generation_config.as_ref().unwrap().max_output_tokens,
            Some(64)
        );
        assert!(matches!(
            req.contents[1].parts[0],
            GeminiPart::FunctionCall(_)
        ));
    }

    #[test]
    fn test_candidate_serializes_camel_case() {
        let resp = GenerateContentResponse {
            candidates: vec![Candidate {
                content: GeminiContent {
                    role: Some("model".into()),
                    parts: vec![GeminiPart::Text("hi".into())],
                },
                finish_reason: Some("STOP".into()),
                index: Some(0),
            }],
            usage_metadata: Some(UsageMetadata {
                prompt_token_count: 3,
                candidates_token_count: 1,
                total_token_count: 4,
                credits_used: None,
            }),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["candidates"][0]["finishReason"], "STOP");
        assert_eq!(v["candidates"][0]["content"]["parts"][0]["text"], "hi");
        assert_eq!(v["usageMetadata"]["totalTokenCount"], 4);
    }
}
