//! Wikipedia integration: page summaries via the REST API and full page
//! content via the Action API.

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::{ensure_success, HttpClient};
use crate::error::{Error, Result};

/// Fetch the REST summary for a wikipedia page URL such as
/// `https://en.wikipedia.org/wiki/Paris`. The summary host follows the
/// page's own host, so language editions resolve to their own API.
pub async fn fetch_summary(client: &HttpClient, page_url: &str) -> Result<Value> {
    let (host, title) = split_page_url(page_url)?;
    let url = format!("https://{host}/api/rest_v1/page/summary/{title}");
    debug!(url, "fetching page summary");
    let resp = ensure_success(client.get(&url, "application/json").await?)?;
    Ok(resp.json().await?)
}

/// Fetch a page's rendered HTML from a MediaWiki site's Action API.
pub async fn fetch_page_html(client: &HttpClient, site: &str, title: &str) -> Result<String> {
    let value = parse_action(client, site, title, "text").await?;
    page_field(&value, "text")
        .ok_or_else(|| Error::NotFound(format!("{site}/{title}")))
}

/// Fetch a page's raw wikitext from a MediaWiki site's Action API.
pub async fn fetch_page_wikitext(client: &HttpClient, site: &str, title: &str) -> Result<String> {
    let value = parse_action(client, site, title, "wikitext").await?;
    page_field(&value, "wikitext")
        .ok_or_else(|| Error::NotFound(format!("{site}/{title}")))
}

async fn parse_action(
    client: &HttpClient,
    site: &str,
    title: &str,
    prop: &str,
) -> Result<Value> {
    let url = format!("https://{site}/w/api.php");
    let query = [
        ("action", "parse"),
        ("format", "json"),
        ("formatversion", "2"),
        ("prop", prop),
        ("page", title),
    ];
    debug!(site, title, prop, "fetching page content");
    let resp = ensure_success(client.get_with_query(&url, &query, "application/json").await?)?;
    Ok(resp.json().await?)
}

/// Pull a `parse.<field>` string out of an Action API response. With
/// `formatversion=2` the field is a plain string; older responses nest it
/// under a `*` key.
fn page_field(value: &Value, field: &str) -> Option<String> {
    let inner = value.get("parse")?.get(field)?;
    match inner {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("*").and_then(Value::as_str).map(String::from),
        _ => None,
    }
}

/// Split a page URL into its host and `/wiki/`-relative title.
fn split_page_url(page_url: &str) -> Result<(String, String)> {
    let url = Url::parse(page_url)?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidIdentifier(page_url.to_string()))?
        .to_string();
    let title = url
        .path()
        .strip_prefix("/wiki/")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidIdentifier(page_url.to_string()))?
        .to_string();
    Ok((host, title))
}
