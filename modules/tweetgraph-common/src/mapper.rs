//! Entity mapper: pure extraction of graph entities from one post payload.
//!
//! The payload is a stream status object: arbitrarily nested, with optional
//! `user`, `entities`, `in_reply_to_*`, `retweeted_status` and `quoted_status`
//! blocks. Mapping never touches the store; it either returns the complete
//! set of nodes and edges for the post or fails with `MalformedPayload`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::TweetGraphError;
use crate::types::{EdgeUpsert, GraphDelta, PostKind, TweetNode, UserNode};

type Object = Map<String, Value>;

/// Map one raw post payload into its normalized entity/relationship set.
pub fn map_post(payload: &Value) -> Result<GraphDelta, TweetGraphError> {
    let status = payload
        .as_object()
        .ok_or_else(|| TweetGraphError::malformed(None, "payload is not an object"))?;
    let post_id =
        post_id(status).ok_or_else(|| TweetGraphError::malformed(None, "missing post id"))?;

    let embedded = Embedded::of(status);
    let kind = match embedded {
        Some(Embedded::Retweet(_)) => PostKind::Retweet,
        Some(Embedded::Quote(_)) => PostKind::Quote,
        None if ReplyTarget::of(status).is_some() => PostKind::Reply,
        None => PostKind::Original,
    };

    let mut delta = GraphDelta::new(post_id.clone(), kind);
    extract_status(status, &mut delta)?;

    if let Some(embedded) = embedded {
        let secondary_id = extract_status(embedded.status(), &mut delta)
            .map_err(|e| nested_error(e, &post_id, embedded.field()))?;
        delta.edges.push(EdgeUpsert::retweeted(&post_id, &secondary_id));
    }

    Ok(delta)
}

/// Embedded status carried by a retweet or quote. Retweet wins when a payload
/// carries both.
#[derive(Clone, Copy)]
enum Embedded<'a> {
    Retweet(&'a Object),
    Quote(&'a Object),
}

impl<'a> Embedded<'a> {
    fn of(status: &'a Object) -> Option<Self> {
        if let Some(rt) = object(status, "retweeted_status") {
            return Some(Embedded::Retweet(rt));
        }
        object(status, "quoted_status").map(Embedded::Quote)
    }

    fn status(&self) -> &'a Object {
        match self {
            Embedded::Retweet(s) | Embedded::Quote(s) => s,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            Embedded::Retweet(_) => "retweeted_status",
            Embedded::Quote(_) => "quoted_status",
        }
    }
}

struct ReplyTarget {
    status_id: String,
    user_id: Option<String>,
    screen_name: Option<String>,
}

impl ReplyTarget {
    fn of(status: &Object) -> Option<Self> {
        let status_id = id_field(status, &["in_reply_to_status_id_str", "in_reply_to_status_id"])?;
        Some(Self {
            status_id,
            user_id: id_field(status, &["in_reply_to_user_id_str", "in_reply_to_user_id"]),
            screen_name: str_field(status, &["in_reply_to_screen_name"]),
        })
    }
}

/// Extract one status (author, mentions, reply chain) into `delta`.
/// Returns the status id.
fn extract_status(status: &Object, delta: &mut GraphDelta) -> Result<String, TweetGraphError> {
    let id = post_id(status).ok_or_else(|| TweetGraphError::malformed(None, "missing post id"))?;

    let user = object(status, "user")
        .ok_or_else(|| TweetGraphError::malformed(Some(&id), "missing user block"))?;
    let author = user_node(user)
        .ok_or_else(|| TweetGraphError::malformed(Some(&id), "user block has no id"))?;

    delta.edges.push(EdgeUpsert::posted(&author.id, &id));
    delta.users.push(author);
    delta.tweets.push(TweetNode {
        id: id.clone(),
        text: post_text(status),
        created_at: str_field(status, &["created_at"]),
        favorite_count: int_field(status, &["favorite_count"]),
    });

    for mention in mentions(status) {
        match mention_stub(mention) {
            Some(user) => {
                delta.edges.push(EdgeUpsert::mentioned(&id, &user.id));
                delta.users.push(user);
            }
            None => debug!(post_id = id.as_str(), "Skipping mention without id"),
        }
    }

    if let Some(target) = ReplyTarget::of(status) {
        delta.tweets.push(TweetNode::stub(target.status_id.clone()));
        if let Some(user_id) = target.user_id {
            delta.edges.push(EdgeUpsert::posted(&user_id, &target.status_id));
            delta.users.push(UserNode {
                id: user_id,
                username: target.screen_name,
                ..Default::default()
            });
        }
        delta.edges.push(EdgeUpsert::replied_to(&id, &target.status_id));
    }

    Ok(id)
}

fn nested_error(err: TweetGraphError, post_id: &str, field: &str) -> TweetGraphError {
    match err {
        TweetGraphError::MalformedPayload { reason, .. } => {
            TweetGraphError::malformed(Some(post_id), format!("{field}: {reason}"))
        }
        other => other,
    }
}

fn post_id(status: &Object) -> Option<String> {
    id_field(status, &["id_str", "id"])
}

/// Full text of extended tweets, falling back to the truncated `text`.
fn post_text(status: &Object) -> Option<String> {
    object(status, "extended_tweet")
        .and_then(|ext| str_field(ext, &["full_text"]))
        .or_else(|| str_field(status, &["full_text", "text"]))
}

fn user_node(user: &Object) -> Option<UserNode> {
    Some(UserNode {
        id: id_field(user, &["id_str", "id"])?,
        name: str_field(user, &["name"]),
        username: str_field(user, &["screen_name", "username"]),
        location: str_field(user, &["location"]),
        followers_count: int_field(user, &["followers_count"]),
        following_count: int_field(user, &["friends_count", "following_count"]),
        statuses_count: int_field(user, &["statuses_count"]),
        profile_image_url: str_field(user, &["profile_image_url_https", "profile_image_url"]),
    })
}

/// Mentioned users are known only by id, name and handle.
fn mention_stub(mention: &Value) -> Option<UserNode> {
    let m = mention.as_object()?;
    Some(UserNode {
        id: id_field(m, &["id_str", "id"])?,
        name: str_field(m, &["name"]),
        username: str_field(m, &["screen_name", "username"]),
        ..Default::default()
    })
}

fn mentions(status: &Object) -> &[Value] {
    object(status, "entities")
        .and_then(|e| {
            ["mentions", "user_mentions"]
                .iter()
                .find_map(|k| e.get(*k).and_then(Value::as_array))
        })
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// Field helpers: first present, non-null key wins
// ---------------------------------------------------------------------------

fn object<'a>(obj: &'a Object, key: &str) -> Option<&'a Object> {
    obj.get(key).and_then(Value::as_object)
}

/// Ids arrive as strings or integers; empty strings count as absent.
fn id_field(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        _ => None,
    })
}

fn str_field(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string))
}

fn int_field(obj: &Object, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_i64))
}
