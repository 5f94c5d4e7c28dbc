//! Authenticated client for the lists API.
//!
//! Every call asks the token source for a fresh bearer token; nothing is
//! cached here. There is no retry and no timeout beyond reqwest's defaults.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use tracing::{debug, info, instrument};
use url::Url;

use crate::error::{ApiError, AuthError, FetchError, ValidationError, require_text};
use crate::model::{List, ListId, TodoId};
use crate::session::SessionTracker;

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String, AuthError>;
}

#[async_trait]
impl TokenSource for SessionTracker {
    async fn bearer_token(&self) -> Result<String, AuthError> {
        self.id_token().await
    }
}

#[derive(Serialize)]
struct TitleBody<'a> {
    title: &'a str,
}

#[derive(Serialize)]
struct TextBody<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct EmptyBody {}

#[derive(Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
}

impl RemoteClient {
    pub fn new(base_url: Url, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            tokens,
        }
    }

    #[instrument(skip(self))]
    pub async fn list_all(&self) -> Result<Vec<List>, ApiError> {
        let route = "/api/lists".to_string();
        let response = self.send(Method::GET, &route, |req| req).await?;
        let lists: Vec<List> = response
            .json()
            .await
            .map_err(|source| FetchError::Decode {
                route: route.clone(),
                source,
            })?;
        debug!(count = lists.len(), "fetched lists");
        Ok(lists)
    }

    #[instrument(skip(self, title), fields(title_len = title.len()))]
    pub async fn create_list(&self, title: &str) -> Result<(), ApiError> {
        let title = require_text(title, ValidationError::EmptyTitle)?;
        self.send(Method::POST, "/api/lists", |req| req.json(&TitleBody { title }))
            .await?;
        info!("list created");
        Ok(())
    }

    #[instrument(skip(self, title), fields(list = %id))]
    pub async fn rename_list(&self, id: &ListId, title: &str) -> Result<(), ApiError> {
        let title = require_text(title, ValidationError::EmptyTitle)?;
        let route = format!("/api/lists/{}", segment(id.as_str()));
        self.send(Method::PUT, &route, |req| req.json(&TitleBody { title }))
            .await?;
        info!("list renamed");
        Ok(())
    }

    /// Deletes a list and every todo in it. Callers confirm with the user
    /// first.
    #[instrument(skip(self), fields(list = %id))]
    pub async fn delete_list(&self, id: &ListId) -> Result<(), ApiError> {
        let route = format!("/api/lists/{}", segment(id.as_str()));
        self.send(Method::DELETE, &route, |req| req).await?;
        info!("list deleted");
        Ok(())
    }

    #[instrument(skip(self, text), fields(list = %list_id, text_len = text.len()))]
    pub async fn add_todo(&self, list_id: &ListId, text: &str) -> Result<(), ApiError> {
        let text = require_text(text, ValidationError::EmptyText)?;
        let route = format!("/api/lists/{}/todos", segment(list_id.as_str()));
        self.send(Method::POST, &route, |req| req.json(&TextBody { text }))
            .await?;
        info!("todo added");
        Ok(())
    }

    #[instrument(skip(self), fields(list = %list_id, todo = %todo_id))]
    pub async fn toggle_todo(&self, list_id: &ListId, todo_id: &TodoId) -> Result<(), ApiError> {
        let route = format!(
            "/api/lists/{}/todos/{}/toggle",
            segment(list_id.as_str()),
            segment(todo_id.as_str())
        );
        self.send(Method::PATCH, &route, |req| req.json(&EmptyBody {}))
            .await?;
        info!("todo toggled");
        Ok(())
    }

    #[instrument(skip(self, text), fields(list = %list_id, todo = %todo_id))]
    pub async fn rename_todo(
        &self,
        list_id: &ListId,
        todo_id: &TodoId,
        text: &str,
    ) -> Result<(), ApiError> {
        let text = require_text(text, ValidationError::EmptyText)?;
        let route = format!(
            "/api/lists/{}/todos/{}",
            segment(list_id.as_str()),
            segment(todo_id.as_str())
        );
        self.send(Method::PUT, &route, |req| req.json(&TextBody { text }))
            .await?;
        info!("todo renamed");
        Ok(())
    }

    #[instrument(skip(self), fields(list = %list_id, todo = %todo_id))]
    pub async fn delete_todo(&self, list_id: &ListId, todo_id: &TodoId) -> Result<(), ApiError> {
        let route = format!(
            "/api/lists/{}/todos/{}",
            segment(list_id.as_str()),
            segment(todo_id.as_str())
        );
        self.send(Method::DELETE, &route, |req| req).await?;
        info!("todo deleted");
        Ok(())
    }

    async fn send<F>(
        &self,
        method: Method,
        route: &str,
        build: F,
    ) -> Result<reqwest::Response, ApiError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url_for(route)?;
        let token = self.tokens.bearer_token().await?;

        debug!(%method, route, "sending request");
        let request = self.http.request(method.clone(), url).bearer_auth(token);
        let response = build(request)
            .send()
            .await
            .map_err(|source| FetchError::Network {
                route: route.to_string(),
                source,
            })?;

        let status = response.status();
        debug!(%method, route, status = status.as_u16(), "received response");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                route: route.to_string(),
                status,
                body,
            }
            .into());
        }

        Ok(response)
    }

    fn url_for(&self, route: &str) -> Result<Url, FetchError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}{route}"))
            .map_err(|e| FetchError::InvalidUrl(format!("{base}{route}: {e}")))
    }
}

fn segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
