use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::classifier::{ClassifierError, Relevance, RelevanceClassifier};
use crate::domain::paper::Paper;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const MODEL: &str = "gpt-4o";

const SYSTEM_PROMPT: &str = "You are an expert researcher in AI/ML bias and fairness.

Your task is to analyze a paper's title and abstract to determine if it's relevant to LLM (Large Language Model) bias and fairness research.

A paper is relevant if it discusses:
- Bias in large language models, generative AI, or foundation models
- Fairness issues in NLP models or text generation
- Ethical concerns with language models
- Demographic bias in AI systems
- Alignment and safety of language models
- Bias evaluation or mitigation in NLP

Respond with exactly \"1\" if the paper is relevant, or \"0\" if it's not relevant.
Do not include any other text in your response.";

/// Relevance classifier backed by the OpenAI chat completions API.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ClassifierError::Build(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: OPENAI_API_URL.to_string(),
            model: MODEL.to_string(),
        })
    }

    /// Points the client at a different endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Strict label check: the model is instructed to answer `1` or `0`, and
/// anything else counts as not relevant so ambiguous output cannot pollute
/// the listing.
fn interpret_label(label: &str) -> Relevance {
    if label.trim() == "1" {
        Relevance::Relevant
    } else {
        Relevance::NotRelevant
    }
}

#[async_trait]
impl RelevanceClassifier for OpenAiClassifier {
    async fn classify(&self, paper: &Paper) -> Result<Relevance, ClassifierError> {
        let prompt = format!(
            "Title: {}\n\nAbstract: {}",
            paper.title, paper.abstract_text
        );
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Message {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: 1,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;
        let label = parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ClassifierError::Parse("response carried no choices".to_string()))?;

        Ok(interpret_label(&label))
    }
}
