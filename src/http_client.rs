const MAX_REDIRECTS: usize = 5;

/// Client for talking to the identity provider. Keeps cookies across the
/// login redirects.
pub fn create_http_client_with_redirects() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() > MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else {
                log::debug!("Redirecting to {}", attempt.url());
                attempt.follow()
            }
        }))
        .build()?;
    Ok(client)
}
