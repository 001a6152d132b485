use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// --- Labels ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeLabel {
    Tweet,
    User,
}

impl NodeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeLabel::Tweet => "Tweet",
            NodeLabel::User => "User",
        }
    }
}

impl std::fmt::Display for NodeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// User → Tweet
    Posted,
    /// Tweet → User
    Mentioned,
    /// Tweet → Tweet
    RepliedTo,
    /// Tweet → Tweet, retweets and quotes alike
    Retweeted,
}

impl EdgeKind {
    /// Relationship type as stored in the graph.
    pub fn rel_type(&self) -> &'static str {
        match self {
            EdgeKind::Posted => "POSTED",
            EdgeKind::Mentioned => "MENTIONED",
            EdgeKind::RepliedTo => "REPLIED_TO",
            EdgeKind::Retweeted => "RETWEETED",
        }
    }

    /// (from, to) labels this relationship connects.
    pub fn endpoints(&self) -> (NodeLabel, NodeLabel) {
        match self {
            EdgeKind::Posted => (NodeLabel::User, NodeLabel::Tweet),
            EdgeKind::Mentioned => (NodeLabel::Tweet, NodeLabel::User),
            EdgeKind::RepliedTo | EdgeKind::Retweeted => (NodeLabel::Tweet, NodeLabel::Tweet),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.rel_type())
    }
}

/// Identity of a node: label plus its `id` property.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub label: NodeLabel,
    pub id: String,
}

impl NodeKey {
    pub fn tweet(id: impl Into<String>) -> Self {
        Self { label: NodeLabel::Tweet, id: id.into() }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self { label: NodeLabel::User, id: id.into() }
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.label, self.id)
    }
}

// --- Property values ---

/// Scalar attribute value written to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Int(i64),
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Text(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Int(n)
    }
}

/// Attributes to set on a node. Keys are the stored property names; absent
/// keys are never touched on the stored node.
pub type Properties = BTreeMap<String, PropertyValue>;

fn put<V: Into<PropertyValue>>(props: &mut Properties, key: &str, value: &Option<V>)
where
    V: Clone,
{
    if let Some(v) = value {
        props.insert(key.to_string(), v.clone().into());
    }
}

// --- Nodes ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetNode {
    pub id: String,
    pub text: Option<String>,
    pub created_at: Option<String>,
    pub favorite_count: Option<i64>,
}

impl TweetNode {
    /// A tweet known only by id (reply target).
    pub fn stub(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn key(&self) -> NodeKey {
        NodeKey::tweet(self.id.clone())
    }

    /// Non-null attributes, excluding the identity key.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        put(&mut props, "text", &self.text);
        put(&mut props, "created_at", &self.created_at);
        put(&mut props, "favorite_count", &self.favorite_count);
        props
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNode {
    pub id: String,
    pub name: Option<String>,
    pub username: Option<String>,
    pub location: Option<String>,
    pub followers_count: Option<i64>,
    pub following_count: Option<i64>,
    pub statuses_count: Option<i64>,
    pub profile_image_url: Option<String>,
}

impl UserNode {
    pub fn key(&self) -> NodeKey {
        NodeKey::user(self.id.clone())
    }

    /// Non-null attributes, excluding the identity key.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        put(&mut props, "name", &self.name);
        put(&mut props, "username", &self.username);
        put(&mut props, "location", &self.location);
        put(&mut props, "followers_count", &self.followers_count);
        put(&mut props, "following_count", &self.following_count);
        put(&mut props, "statuses_count", &self.statuses_count);
        put(&mut props, "profile_image_url", &self.profile_image_url);
        props
    }
}

// --- Edges ---

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeUpsert {
    pub kind: EdgeKind,
    pub from: NodeKey,
    pub to: NodeKey,
}

impl EdgeUpsert {
    pub fn posted(user_id: &str, tweet_id: &str) -> Self {
        Self {
            kind: EdgeKind::Posted,
            from: NodeKey::user(user_id),
            to: NodeKey::tweet(tweet_id),
        }
    }

    pub fn mentioned(tweet_id: &str, user_id: &str) -> Self {
        Self {
            kind: EdgeKind::Mentioned,
            from: NodeKey::tweet(tweet_id),
            to: NodeKey::user(user_id),
        }
    }

    pub fn replied_to(tweet_id: &str, target_id: &str) -> Self {
        Self {
            kind: EdgeKind::RepliedTo,
            from: NodeKey::tweet(tweet_id),
            to: NodeKey::tweet(target_id),
        }
    }

    pub fn retweeted(tweet_id: &str, original_id: &str) -> Self {
        Self {
            kind: EdgeKind::Retweeted,
            from: NodeKey::tweet(tweet_id),
            to: NodeKey::tweet(original_id),
        }
    }
}

// --- Mapper output ---

/// Which optional blocks shaped the primary post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    Original,
    Reply,
    Retweet,
    Quote,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostKind::Original => "original",
            PostKind::Reply => "reply",
            PostKind::Retweet => "retweet",
            PostKind::Quote => "quote",
        }
    }
}

/// Normalized entities and relationships extracted from one post payload.
/// Transient: compiled into upserts and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDelta {
    pub post_id: String,
    pub kind: PostKind,
    pub tweets: Vec<TweetNode>,
    pub users: Vec<UserNode>,
    pub edges: Vec<EdgeUpsert>,
}

impl GraphDelta {
    pub fn new(post_id: impl Into<String>, kind: PostKind) -> Self {
        Self {
            post_id: post_id.into(),
            kind,
            tweets: Vec::new(),
            users: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn has_edge(&self, edge: &EdgeUpsert) -> bool {
        self.edges.contains(edge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_user_carries_only_known_fields() {
        let user = UserNode {
            id: "u1".into(),
            username: Some("alice".into()),
            ..Default::default()
        };
        let props = user.properties();
        assert_eq!(props.len(), 1);
        assert_eq!(props.get("username"), Some(&PropertyValue::Text("alice".into())));
        assert!(!props.contains_key("id"));
    }

    #[test]
    fn edge_constructors_respect_endpoint_labels() {
        for edge in [
            EdgeUpsert::posted("u", "t"),
            EdgeUpsert::mentioned("t", "u"),
            EdgeUpsert::replied_to("t", "t2"),
            EdgeUpsert::retweeted("t", "t2"),
        ] {
            let (from, to) = edge.kind.endpoints();
            assert_eq!(edge.from.label, from);
            assert_eq!(edge.to.label, to);
        }
    }
}
