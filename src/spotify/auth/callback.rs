use html_to_string_macro::html;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{Error, Result};

/// Query parameters spotify appends to the redirect uri
#[derive(Debug, Deserialize)]
pub struct AuthCodeResponse {
    pub code: Option<String>,
    pub error: Option<String>,
    pub state: String,
}

impl AuthCodeResponse {
    /// Authorization code from a redirect query, checking the state against forgery
    pub fn code(query: &str, state: &str) -> Result<String> {
        let response: AuthCodeResponse = serde_qs::from_str(query)
            .map_err(|e| Error::auth(format!("invalid authorization response: {e}")))?;
        if let Some(err) = response.error {
            return Err(Error::auth(format!("authorization denied: {err}")));
        }
        if response.state != state {
            return Err(Error::auth("invalid response state"));
        }
        response
            .code
            .ok_or_else(|| Error::auth("spotify did not send an authorization code"))
    }
}

/// Serves the redirect uri during dev mode and hands the authorization code back
#[derive(Clone)]
pub struct Callback {
    path: String,
    state: String,
    tx: UnboundedSender<Result<String>>,
}

macro_rules! layout {
    ($($html: tt)*) => {
        layout(html! { $($html)*})
    };
}

impl Callback {
    pub fn new(path: impl Into<String>, state: String, tx: UnboundedSender<Result<String>>) -> Self {
        Self {
            path: path.into(),
            state,
            tx,
        }
    }

    fn page(status: StatusCode, body: String) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from(body)));
        *response.status_mut() = status;
        response
    }

    fn handle(&self, query: Option<&str>) -> Response<Full<Bytes>> {
        let result = match query {
            Some(query) => AuthCodeResponse::code(query, &self.state),
            None => Err(Error::auth("spotify did not send a response")),
        };

        let page = match &result {
            Ok(_) => Self::page(
                StatusCode::OK,
                layout! {
                    <h1>
                        "Successfully authenticated Biotify with "
                        <span class="green">"Spotify"</span>
                    </h1>
                    <h3>"This tab may now be closed"</h3>
                },
            ),
            Err(err) => {
                log::error!("{err}");
                Self::page(
                    StatusCode::BAD_REQUEST,
                    layout! {
                        <h1>"Authentication failed"</h1>
                        <h3>{err.to_string()}</h3>
                    },
                )
            }
        };

        // The receiver is gone once a code has been accepted
        let _ = self.tx.send(result);
        page
    }
}

impl Service<Request<Incoming>> for Callback {
    type Response = Response<Full<Bytes>>;
    type Error = std::convert::Infallible;
    type Future = futures::future::Ready<std::result::Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let response = if req.method() == Method::GET && req.uri().path() == self.path {
            self.handle(req.uri().query())
        } else {
            Self::page(
                StatusCode::NOT_FOUND,
                layout! {
                    <h1>"404 Page not found"</h1>
                },
            )
        };
        futures::future::ready(Ok(response))
    }
}

fn layout(body: String) -> String {
    html! {
        <html>
            <head>
                <title>"Biotify"</title>
                <style>"
                * {
                    box-sizing: border-box
                }
                html {
                    font-family: Arial;
                    background-color: #191414;
                    color: #FFFFFF
                }
                :is(h1, h3) {
                    text-align: center;
                }
                body {
                    padding: 1.5rem;
                }
                .green {
                    color: #1DB954
                }
                "</style>
            </head>
            <body>
                {body}
            </body>
        </html>
    }
}
