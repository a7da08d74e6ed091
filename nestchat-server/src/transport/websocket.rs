//! WebSocket transport over tokio-tungstenite
//!
//! Routes (query parameters are percent-decoded):
//! - `/ws/chat?email=&group_id=` chat inside one group
//! - `/ws/listen?email=` new-message notifications for every group
//! - `/ws/watch-new-groups?email=` new-group announcements
//!
//! A bad route is refused during the handshake with an HTTP error status.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::future;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use nestchat_protocol::{encode_server_message, GroupId, ParseGroupIdError, Scope, ServerMessage};

use super::TransportError;
use crate::hub::ChatHub;

/// A parsed connection request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Chat { email: String, group: GroupId },
    Listen { email: String },
    WatchNewGroups { email: String },
}

impl Route {
    pub fn identity(&self) -> &str {
        match self {
            Route::Chat { email, .. } | Route::Listen { email } | Route::WatchNewGroups { email } => {
                email.as_str()
            }
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Route::Chat { group, .. } => Scope::Group(*group),
            Route::Listen { .. } | Route::WatchNewGroups { .. } => Scope::Unscoped,
        }
    }
}

/// Why a connection request was refused
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("no websocket endpoint at {0}")]
    NotFound(String),

    #[error("email is required")]
    MissingEmail,

    #[error("group_id is required")]
    MissingGroupId,

    #[error(transparent)]
    InvalidGroupId(#[from] ParseGroupIdError),
}

impl RouteError {
    fn status(&self) -> StatusCode {
        match self {
            RouteError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Parse the request path and query string
pub fn parse_route(path: &str, query: Option<&str>) -> Result<Route, RouteError> {
    let query = query.unwrap_or("");
    let email = query_param(query, "email")
        .filter(|e| !e.trim().is_empty())
        .ok_or(RouteError::MissingEmail);

    match path.trim_end_matches('/') {
        "/ws/chat" => {
            let email = email?;
            let group = query_param(query, "group_id").ok_or(RouteError::MissingGroupId)?;
            Ok(Route::Chat {
                email,
                group: group.parse()?,
            })
        }
        "/ws/listen" => Ok(Route::Listen { email: email? }),
        "/ws/watch-new-groups" => Ok(Route::WatchNewGroups { email: email? }),
        other => Err(RouteError::NotFound(other.to_string())),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.into_owned())
}

/// Upgrade one TCP connection and serve it until it closes
pub async fn accept_connection(hub: Arc<ChatHub>, stream: TcpStream, peer: SocketAddr) {
    let mut route = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match parse_route(request.uri().path(), request.uri().query()) {
            Ok(parsed) => {
                route = Some(parsed);
                Ok(response)
            }
            Err(e) => {
                debug!("Refusing websocket from {}: {}", peer, e);
                let mut refusal = ErrorResponse::new(Some(e.to_string()));
                *refusal.status_mut() = e.status();
                Err(refusal)
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let Some(route) = route else {
        return;
    };

    let (sink, stream) = ws.split();

    let inbound = stream
        .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => Some(String::from_utf8(bytes.to_vec()).map_err(|_| {
                    TransportError::InvalidFrame("binary frame is not UTF-8".into())
                })),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

    let outbound = sink.with(|message: ServerMessage| {
        future::ready(
            encode_server_message(&message)
                .map(|text| Message::Text(text.into()))
                .map_err(TransportError::from),
        )
    });

    info!("{} connected from {} ({})", route.identity(), peer, route.scope());
    match hub
        .serve_connection(route.identity(), route.scope(), inbound, outbound)
        .await
    {
        Ok(reason) => debug!("{} from {} disconnected: {:?}", route.identity(), peer, reason),
        Err(e) if e.is_invariant_violation() => {
            error!("Could not serve {} from {}: {}", route.identity(), peer, e)
        }
        Err(e) => warn!("Could not serve {} from {}: {}", route.identity(), peer, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUP: &str = "65f0a1b2c3d4e5f601234567";

    #[test]
    fn test_parse_chat_route() {
        let route = parse_route(
            "/ws/chat",
            Some(&format!("email=alice%40example.com&group_id={}", GROUP)),
        )
        .unwrap();
        assert_eq!(
            route,
            Route::Chat {
                email: "alice@example.com".into(),
                group: GROUP.parse().unwrap(),
            }
        );
        assert_eq!(route.identity(), "alice@example.com");
        assert_eq!(route.scope(), Scope::Group(GROUP.parse().unwrap()));
    }

    #[test]
    fn test_parse_listener_routes() {
        assert_eq!(
            parse_route("/ws/listen", Some("email=bob@example.com")).unwrap(),
            Route::Listen {
                email: "bob@example.com".into()
            }
        );
        let watch = parse_route("/ws/watch-new-groups/", Some("email=bob%2Btag@example.com")).unwrap();
        assert_eq!(watch.identity(), "bob+tag@example.com");
        assert_eq!(watch.scope(), Scope::Unscoped);
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        assert!(matches!(
            parse_route("/ws/listen", None),
            Err(RouteError::MissingEmail)
        ));
        assert!(matches!(
            parse_route("/ws/listen", Some("email=")),
            Err(RouteError::MissingEmail)
        ));
        assert!(matches!(
            parse_route("/ws/chat", Some("email=a@x.com")),
            Err(RouteError::MissingGroupId)
        ));
        let err = parse_route("/ws/chat", Some("email=a@x.com&group_id=nope")).unwrap_err();
        assert!(matches!(err, RouteError::InvalidGroupId(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = parse_route("/ws/other", Some("email=a@x.com")).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_query_param_edge_cases() {
        assert_eq!(query_param("a=1&b=2", "b").as_deref(), Some("2"));
        assert_eq!(query_param("flag&a=1", "flag").as_deref(), Some(""));
        assert_eq!(query_param("a=1", "b"), None);
        assert_eq!(query_param("", "a"), None);
    }
}
