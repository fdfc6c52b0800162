use reqwest::{Client, IntoUrl};
use serde::{Deserialize, Serialize};

use crate::providers::apireq;
use crate::providers::apireq::{ByteStream, ReqwestResponseStreamExt, SseJsonParser, Url};

#[derive(thiserror::Error, Debug)]
pub(super) enum Error {
    /// The API Base is not a URL that can be used in a network request
    #[error("invalid api base")]
    InvalidApiBase(#[source] reqwest::Error),

    /// Endpoint URL is invalid
    #[error("invalid endpoint")]
    InvalidEndpoint(
        #[from]
        #[source]
        url::ParseError,
    ),

    /// A bad response: the parser failed to parse the
    /// response stream
    #[error("failed to parse streamed response")]
    StreamParser(
        #[from]
        #[source]
        apireq::SseError,
    ),

    /// Some issue with the request
    #[error("{}", .0)]
    RequestFailed(
        #[from]
        #[source]
        apireq::ReqwestError,
    ),

    /// Your request was malformed or missing some required parameters,
    /// such as a token or an input.
    #[error("{}", .0.message)]
    BadRequest(ApiErrorPayload),

    /// The credentials were missing or rejected.
    #[error("{}", .0.message)]
    Authentication(ApiErrorPayload),

    /// You don't have access to the requested resource.
    #[error("{}", .0.message)]
    PermissionDenied(ApiErrorPayload),

    /// Requested resource does not exist.
    #[error("{}", .0.message)]
    NotFound(ApiErrorPayload),

    /// The resource was updated by another request.
    #[error("{}", .0.message)]
    Conflict(ApiErrorPayload),

    /// Unable to process the request despite the format being correct.
    #[error("{}", .0.message)]
    UnprocessableEntity(ApiErrorPayload),

    /// You have hit your assigned rate limit.
    #[error("{}", .0.message)]
    RateLimit(ApiErrorPayload),

    /// The backend has an internal issue
    #[error("{}", .0.message)]
    InternalError(ApiErrorPayload),

    /// The engine is currently overloaded, please try again later
    #[error("{}", .0.message)]
    ApiOverloaded(ApiErrorPayload),

    /// Some unknown error was returned by the API
    #[error("{}", .0.message)]
    UnknownStatus(ApiErrorPayload),
}

impl Error {
    fn from_status(status: u16, payload: ApiErrorPayload) -> Error {
        match status {
            400 => Error::BadRequest(payload),
            401 => Error::Authentication(payload),
            403 => Error::PermissionDenied(payload),
            404 => Error::NotFound(payload),
            409 => Error::Conflict(payload),
            422 => Error::UnprocessableEntity(payload),
            429 => Error::RateLimit(payload),
            500 => Error::InternalError(payload),
            502..=504 => Error::ApiOverloaded(payload),
            _ => Error::UnknownStatus(payload),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub(super) enum Role {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Debug)]
pub(super) struct ChatMessage<'m> {
    pub content: &'m str,
    pub role: Role,
}

/* Structures to serialize /chat/completions */

#[derive(Serialize, Debug)]
struct ChatCompletionRequest<'o> {
    model: &'o str,
    messages: &'o [ChatMessage<'o>],
    stream: bool,
}

/* Structures to deseralize /chat/completions */

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub(super) enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    #[serde(other)]
    Other,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub(super) struct Delta {
    pub role: Option<Role>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub(super) struct Choice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

// Third-party backends are loose about the envelope, only the
// choices are read.
#[derive(Serialize, Deserialize, Debug)]
pub(super) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

/* Structures to deseralize /models */

#[derive(Deserialize, Debug)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize, Debug)]
struct ModelList {
    data: Vec<ModelEntry>,
}

/* API Errors */

#[derive(Deserialize, Debug)]
pub(super) struct ApiErrorPayload {
    message: String,
    #[serde(rename = "type", default)]
    typ: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    error: ApiErrorPayload,
}

impl ApiErrorPayload {
    // Not every backend answers errors with JSON
    fn from_body(body: &str) -> ApiErrorPayload {
        match serde_json::from_str::<ApiErrorResponse>(body) {
            Ok(response) => response.error,
            Err(_) => ApiErrorPayload {
                message: body.trim().chars().take(512).collect(),
                typ: None,
            },
        }
    }
}

pub(super) struct StreamingChatResponse {
    stream: SseJsonParser<ByteStream>,
}

impl StreamingChatResponse {
    pub(super) async fn next(&mut self) -> Option<Result<ChatCompletionChunk, Error>> {
        let delta = self.stream.parse::<ChatCompletionChunk>().await;

        delta.map(|e| e.map_err(|e| e.into()))
    }
}

pub(super) struct OpenAIApi {
    client: Client,
    api_base: Url,
    api_key: Option<String>,
}

impl OpenAIApi {
    /// `api_base` is the URL the `chat/completions` and `models` routes hang
    /// off, e.g. `https://api.openai.com/v1`.
    pub(super) fn new<U: IntoUrl>(api_base: U, api_key: Option<String>) -> Result<OpenAIApi, Error> {
        let mut api_base = api_base.into_url().map_err(Error::InvalidApiBase)?;

        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        Ok(OpenAIApi {
            client: Client::new(),
            api_base,
            api_key,
        })
    }

    pub(super) fn endpoint(&self, route: &str) -> Result<Url, Error> {
        Ok(self.api_base.join(route)?)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn error_from_response(res: reqwest::Response) -> Error {
        let status = res.status().as_u16();

        match res.text().await {
            Ok(body) => Error::from_status(status, ApiErrorPayload::from_body(&body)),
            Err(err) => Error::RequestFailed(err.into()),
        }
    }

    pub(super) async fn streaming_chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage<'_>],
    ) -> Result<StreamingChatResponse, Error> {
        let url = self.endpoint("chat/completions")?;

        let res = self
            .authorized(self.client.post(url))
            .json(&ChatCompletionRequest {
                model,
                messages,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        if res.status().is_success() {
            Ok(StreamingChatResponse {
                stream: res.stream_sse(),
            })
        } else {
            Err(Self::error_from_response(res).await)
        }
    }

    pub(super) async fn list_models(&self) -> Result<Vec<String>, Error> {
        let url = self.endpoint("models")?;

        let res = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        if !res.status().is_success() {
            return Err(Self::error_from_response(res).await);
        }

        let list: ModelList = res
            .json()
            .await
            .map_err(|e| Error::RequestFailed(e.into()))?;

        Ok(list.data.into_iter().map(|m| m.id).collect())
    }
}
