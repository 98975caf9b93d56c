use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};

use super::ErrorResponse;

/// Turns a non-success response into an error carrying the server's code and message.
pub async fn bail_if_err(response: Response, expected_code: StatusCode) -> Result<Response> {
    if response.status() == expected_code {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await?;
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(error) => bail!("{} (code {}): {}", status, error.code, error.message),
        Err(_) => bail!("{}: {}", status, text),
    }
}
