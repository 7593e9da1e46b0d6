use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ctf_orchestrator::ChallengeDetails;
use log::debug;
use reqwest::{header, header::HeaderMap, IntoUrl, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize};

#[derive(Debug, Deserialize)]
struct FlagReply {
    flag: String,
}

#[derive(Debug, Deserialize)]
struct MessageReply {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: String,
}

#[derive(Clone, Debug)]
/// Client for the challenge routes of a running service. `endpoint` is the
/// service root, the `/challenge` prefix is added per request.
pub struct ChallengeClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl ChallengeClient {
    pub fn connect<T: IntoUrl>(endpoint: T) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .default_headers({
                let mut headers = HeaderMap::with_capacity(1);
                headers.insert(
                    header::ACCEPT,
                    header::HeaderValue::from_static("application/json"),
                );
                headers
            })
            .build()?;

        let mut endpoint = endpoint.into_url()?;
        // keep a base path such as `/ctf` when joining request paths
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn challenge(&self) -> Result<ChallengeDetails, anyhow::Error> {
        self.get("challenge").await
    }

    /// Returns the flag once the challenge is solved. An unsolved challenge
    /// is reported as an error carrying the service message.
    pub async fn solve(&self) -> Result<String, anyhow::Error> {
        let reply: FlagReply = self.get("challenge/solve").await?;
        Ok(reply.flag)
    }

    /// Requests a redeploy. The service answers before the new instance is
    /// live, poll [`ChallengeClient::challenge`] for its status.
    pub async fn reset(&self) -> Result<String, anyhow::Error> {
        let reply: MessageReply = self.get("challenge/reset").await?;
        Ok(reply.message)
    }

    /// Challenge source files, decoded.
    pub async fn sources(&self) -> Result<Vec<String>, anyhow::Error> {
        let encoded: Vec<String> = self.get("challenge/source").await?;
        encoded.iter().map(|source| decode_source(source)).collect()
    }

    fn request_url(&self, path: &str) -> Result<Url, anyhow::Error> {
        self.endpoint
            .join(path)
            .map_err(|e| anyhow!("Invalid request path {}, with error: {}", path, e))
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, anyhow::Error> {
        let url = self.request_url(path)?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        reply_value(status, &body)
    }
}

fn reply_value<R: DeserializeOwned>(status: StatusCode, body: &[u8]) -> Result<R, anyhow::Error> {
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorReply>(body)
            .map(|reply| reply.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
        return Err(anyhow!(
            "Request failed with status: code = {}, message = {}",
            status.as_u16(),
            message
        ));
    }

    serde_json::from_slice(body)
        .map_err(|e| anyhow!("Failed to deserialize response, with error: {}", e))
}

fn decode_source(encoded: &str) -> Result<String, anyhow::Error> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| anyhow!("Invalid base64 source, with error: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Source is not valid utf-8, with error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reply_keeps_service_message() {
        let err = reply_value::<FlagReply>(
            StatusCode::BAD_REQUEST,
            br#"{"error":"Challenge is not complete."}"#,
        )
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Request failed with status: code = 400, message = Challenge is not complete."
        );
    }

    #[test]
    fn test_non_json_error_body() {
        let err = reply_value::<FlagReply>(StatusCode::BAD_GATEWAY, b"upstream down").unwrap_err();
        assert!(err.to_string().ends_with("message = upstream down"));
    }

    #[test]
    fn test_endpoint_base_path_is_kept() {
        let client = ChallengeClient::connect("http://ctf.example/team-7").unwrap();
        assert_eq!(client.endpoint().as_str(), "http://ctf.example/team-7/");
        assert_eq!(
            client.request_url("challenge/solve").unwrap().as_str(),
            "http://ctf.example/team-7/challenge/solve"
        );

        let client = ChallengeClient::connect("http://localhost:3000").unwrap();
        assert_eq!(
            client.request_url("challenge").unwrap().as_str(),
            "http://localhost:3000/challenge"
        );
    }

    #[test]
    fn test_decode_source() {
        assert_eq!(
            decode_source("Y29udHJhY3QgU2V0dXAge30=").unwrap(),
            "contract Setup {}"
        );
        assert!(decode_source("not base64!").is_err());
    }
}
