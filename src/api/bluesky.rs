//! Bluesky (AT Protocol) feed and engagement client

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{
    Author, FeedEntry, FeedId, FeedReason, Label, MediaAttachment, MediaType, Post, ReplyContext,
    ViewerState,
};

use super::{FeedPage, FeedSource, PostActions};

/// Default PDS URL for Bluesky
pub const DEFAULT_PDS_URL: &str = "https://bsky.social";

const LIKE_COLLECTION: &str = "app.bsky.feed.like";
const REPOST_COLLECTION: &str = "app.bsky.feed.repost";

/// Bluesky API client
pub struct BlueskyClient {
    client: Client,
    pds_url: String,
    access_jwt: String,
    did: String,
}

impl BlueskyClient {
    /// Login to Bluesky using the default PDS
    pub async fn login(handle: &str, app_password: &str) -> Result<Self> {
        Self::login_with_pds(handle, app_password, DEFAULT_PDS_URL).await
    }

    /// Login to Bluesky with a custom PDS URL
    pub async fn login_with_pds(handle: &str, app_password: &str, pds_url: &str) -> Result<Self> {
        let client = Client::new();
        let pds_url = pds_url.trim_end_matches('/').to_string();

        let method = "com.atproto.server.createSession";
        let request = CreateSessionRequest {
            identifier: handle.to_string(),
            password: app_password.to_string(),
        };

        let response = client
            .post(format!("{pds_url}/xrpc/{method}"))
            .json(&request)
            .send()
            .await?;

        let session: CreateSessionResponse = read_json(method, response).await?;
        tracing::info!("Logged in to {} as {}", pds_url, session.handle);

        Ok(Self {
            client,
            pds_url,
            access_jwt: session.access_jwt,
            did: session.did,
        })
    }

    async fn query<T: DeserializeOwned>(&self, method: &str, params: &str) -> Result<T> {
        let url = format!("{}/xrpc/{}?{}", self.pds_url, method, params);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_jwt)
            .send()
            .await?;

        read_json(method, response).await
    }

    async fn procedure<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}/xrpc/{}", self.pds_url, method);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_jwt)
            .json(body)
            .send()
            .await?;

        read_json(method, response).await
    }

    async fn create_subject_record(&self, collection: &str, uri: &str, cid: &str) -> Result<String> {
        let request = CreateRecordRequest {
            repo: self.did.clone(),
            collection: collection.to_string(),
            record: SubjectRecord {
                subject: RecordRef {
                    uri: uri.to_string(),
                    cid: cid.to_string(),
                },
                created_at: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                r#type: collection.to_string(),
            },
        };

        let created: CreateRecordResponse = self
            .procedure("com.atproto.repo.createRecord", &request)
            .await?;
        Ok(created.uri)
    }

    async fn delete_record(&self, record_uri: &str) -> Result<()> {
        let (repo, collection, rkey) = split_record_uri(record_uri)
            .ok_or_else(|| Error::InvalidResponse(format!("not a record URI: {record_uri}")))?;

        let request = DeleteRecordRequest {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        };

        let _: serde_json::Value = self
            .procedure("com.atproto.repo.deleteRecord", &request)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FeedSource for BlueskyClient {
    async fn fetch_feed(
        &self,
        feed: &FeedId,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<FeedPage> {
        let (method, mut params) = match feed {
            FeedId::Following => ("app.bsky.feed.getTimeline", format!("limit={limit}")),
            FeedId::Generator(uri) => (
                "app.bsky.feed.getFeed",
                format!("feed={}&limit={}", urlencoding::encode(uri), limit),
            ),
            FeedId::List(uri) => (
                "app.bsky.feed.getListFeed",
                format!("list={}&limit={}", urlencoding::encode(uri), limit),
            ),
        };
        if let Some(cursor) = cursor {
            params.push_str("&cursor=");
            params.push_str(&urlencoding::encode(cursor));
        }

        let response: GetFeedResponse = self.query(method, &params).await?;
        tracing::debug!(
            "{} returned {} entries (cursor: {:?})",
            method,
            response.feed.len(),
            response.cursor
        );

        Ok(FeedPage {
            entries: response
                .feed
                .into_iter()
                .map(FeedViewPost::into_entry)
                .collect(),
            cursor: response.cursor.filter(|c| !c.is_empty()),
        })
    }
}

#[async_trait]
impl PostActions for BlueskyClient {
    async fn like_post(&self, uri: &str, cid: &str) -> Result<String> {
        self.create_subject_record(LIKE_COLLECTION, uri, cid).await
    }

    async fn unlike_post(&self, like_uri: &str) -> Result<()> {
        self.delete_record(like_uri).await
    }

    async fn repost_post(&self, uri: &str, cid: &str) -> Result<String> {
        self.create_subject_record(REPOST_COLLECTION, uri, cid).await
    }

    async fn unrepost_post(&self, repost_uri: &str) -> Result<()> {
        self.delete_record(repost_uri).await
    }
}

/// Decode a JSON body, mapping non-success statuses to [`Error::Api`]
async fn read_json<T: DeserializeOwned>(method: &str, response: Response) -> Result<T> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(Error::NotAuthenticated);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(Error::Api {
            endpoint: method.to_string(),
            status: status.as_u16(),
            message,
        });
    }

    let body = response.bytes().await?;
    if body.is_empty() {
        // deleteRecord may answer with an empty body
        return serde_json::from_slice(b"null").map_err(Into::into);
    }
    serde_json::from_slice(&body).map_err(Into::into)
}

/// Split `at://<repo>/<collection>/<rkey>`
fn split_record_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let collection = parts.next().filter(|s| !s.is_empty())?;
    let rkey = parts.next().filter(|s| !s.is_empty() && !s.contains('/'))?;
    Some((repo, collection, rkey))
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

// ==================== API Types ====================

#[derive(Debug, Serialize)]
struct CreateSessionRequest {
    identifier: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[serde(rename = "accessJwt")]
    access_jwt: String,
    did: String,
    handle: String,
}

#[derive(Debug, Deserialize)]
struct GetFeedResponse {
    feed: Vec<FeedViewPost>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FeedViewPost {
    post: PostView,
    #[serde(default)]
    reason: Option<ReasonView>,
    #[serde(default)]
    reply: Option<ReplyRefView>,
}

#[derive(Debug, Deserialize)]
struct ReasonView {
    #[serde(rename = "$type")]
    reason_type: String,
    #[serde(default)]
    by: Option<ActorView>,
    #[serde(rename = "indexedAt", default)]
    indexed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyRefView {
    // Either a postView or a notFound/blocked stub
    #[serde(default)]
    root: Option<serde_json::Value>,
    #[serde(default)]
    parent: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ActorView {
    did: String,
    handle: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    avatar: Option<String>,
    #[serde(default)]
    labels: Vec<LabelView>,
}

#[derive(Debug, Deserialize)]
struct PostView {
    uri: String,
    cid: String,
    author: ActorView,
    record: RecordView,
    #[serde(rename = "replyCount", default)]
    reply_count: u32,
    #[serde(rename = "repostCount", default)]
    repost_count: u32,
    #[serde(rename = "likeCount", default)]
    like_count: u32,
    #[serde(rename = "quoteCount", default)]
    quote_count: u32,
    #[serde(rename = "indexedAt")]
    indexed_at: String,
    #[serde(default)]
    embed: Option<Embed>,
    #[serde(default)]
    viewer: Option<ViewerView>,
    #[serde(default)]
    labels: Vec<LabelView>,
}

#[derive(Debug, Deserialize)]
struct RecordView {
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt")]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Embed {
    images: Option<Vec<EmbedImage>>,
}

#[derive(Debug, Deserialize)]
struct EmbedImage {
    thumb: Option<String>,
    fullsize: String,
    alt: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ViewerView {
    like: Option<String>,
    repost: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelView {
    val: String,
    src: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRecordRequest<T> {
    repo: String,
    collection: String,
    record: T,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

#[derive(Debug, Serialize)]
struct DeleteRecordRequest {
    repo: String,
    collection: String,
    rkey: String,
}

/// Like and repost records share a shape
#[derive(Debug, Serialize)]
struct SubjectRecord {
    subject: RecordRef,
    #[serde(rename = "createdAt")]
    created_at: String,
    #[serde(rename = "$type")]
    r#type: String,
}

#[derive(Debug, Serialize)]
struct RecordRef {
    uri: String,
    cid: String,
}

impl ActorView {
    fn into_author(self) -> Author {
        Author {
            did: self.did,
            handle: self.handle,
            display_name: self.display_name,
            avatar: self.avatar,
        }
    }
}

impl PostView {
    fn into_post(mut self) -> Post {
        let created_at = parse_time(self.record.created_at.as_deref())
            .or_else(|| parse_time(Some(&self.indexed_at)))
            .unwrap_or_else(Utc::now);

        let media = self
            .embed
            .and_then(|e| e.images)
            .map(|images| {
                images
                    .into_iter()
                    .map(|img| MediaAttachment {
                        url: img.fullsize,
                        preview_url: img.thumb,
                        media_type: MediaType::Image,
                        alt_text: img.alt,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let viewer = self.viewer.unwrap_or_default();

        let mut label_views = std::mem::take(&mut self.labels);
        label_views.append(&mut self.author.labels);
        let labels = label_views
            .into_iter()
            .map(|l| Label {
                val: l.val,
                src: l.src,
            })
            .collect();

        Post {
            uri: self.uri,
            cid: Some(self.cid),
            author: self.author.into_author(),
            text: self.record.text,
            created_at,
            like_count: self.like_count,
            repost_count: self.repost_count,
            reply_count: self.reply_count,
            quote_count: self.quote_count,
            viewer: ViewerState {
                like: viewer.like,
                repost: viewer.repost,
            },
            labels,
            media,
        }
    }
}

impl FeedViewPost {
    fn into_entry(self) -> FeedEntry {
        let reason = self.reason.and_then(|reason| match reason.reason_type.as_str() {
            "app.bsky.feed.defs#reasonRepost" => {
                let by = reason.by?.into_author();
                let indexed_at = parse_time(reason.indexed_at.as_deref()).unwrap_or_else(Utc::now);
                Some(FeedReason::Repost { by, indexed_at })
            }
            "app.bsky.feed.defs#reasonPin" => Some(FeedReason::Pin),
            _ => None,
        });

        let reply = self.reply.map(|reply| ReplyContext {
            root: reply.root.and_then(reply_post),
            parent: reply.parent.and_then(reply_post),
        });

        let mut entry = FeedEntry::new(self.post.into_post());
        entry.reason = reason;
        entry.reply = reply;
        entry
    }
}

/// Blocked and not-found stubs lack `record`/`author` and decode to `None`
fn reply_post(value: serde_json::Value) -> Option<Post> {
    serde_json::from_value::<PostView>(value)
        .ok()
        .map(PostView::into_post)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMELINE_JSON: &str = r#"{
        "cursor": "1700000000000::bafy",
        "feed": [
            {
                "post": {
                    "uri": "at://did:plc:alice/app.bsky.feed.post/3k1",
                    "cid": "bafyalice",
                    "author": {"did": "did:plc:alice", "handle": "alice.test"},
                    "record": {"$type": "app.bsky.feed.post", "text": "hello", "createdAt": "2024-05-01T12:00:00.000Z"},
                    "likeCount": 3,
                    "repostCount": 1,
                    "quoteCount": 2,
                    "indexedAt": "2024-05-01T12:00:01.000Z",
                    "viewer": {"like": "at://did:plc:me/app.bsky.feed.like/3kl"},
                    "labels": [{"val": "graphic-media", "src": "did:plc:labeler"}]
                },
                "reason": {
                    "$type": "app.bsky.feed.defs#reasonRepost",
                    "by": {"did": "did:plc:bob", "handle": "bob.test", "displayName": "Bob"},
                    "indexedAt": "2024-05-01T13:00:00.000Z"
                },
                "reply": {
                    "root": {"$type": "app.bsky.feed.defs#notFoundPost", "uri": "at://x", "notFound": true},
                    "parent": {
                        "uri": "at://did:plc:carol/app.bsky.feed.post/3k0",
                        "cid": "bafycarol",
                        "author": {"did": "did:plc:carol", "handle": "carol.test"},
                        "record": {"text": "parent", "createdAt": "2024-05-01T11:00:00Z"},
                        "indexedAt": "2024-05-01T11:00:00Z"
                    }
                }
            }
        ]
    }"#;

    #[test]
    fn test_feed_view_post_mapping() {
        let response: GetFeedResponse = serde_json::from_str(TIMELINE_JSON).unwrap();
        assert_eq!(response.cursor.as_deref(), Some("1700000000000::bafy"));

        let entry = response.feed.into_iter().next().unwrap().into_entry();
        assert_eq!(entry.uri(), "at://did:plc:alice/app.bsky.feed.post/3k1");
        assert_eq!(entry.post.cid.as_deref(), Some("bafyalice"));
        assert_eq!(entry.post.like_count, 3);
        assert_eq!(entry.post.quote_count, 2);
        assert_eq!(
            entry.post.viewer.like.as_deref(),
            Some("at://did:plc:me/app.bsky.feed.like/3kl")
        );
        assert!(entry.post.viewer.repost.is_none());
        assert_eq!(entry.post.labels[0].val, "graphic-media");
        assert_eq!(entry.reposted_by(), Some("Bob"));
        assert_eq!(
            entry.created_at(),
            parse_time(Some("2024-05-01T12:00:00.000Z")).unwrap()
        );

        let reply = entry.reply.unwrap();
        assert!(reply.root.is_none());
        assert_eq!(reply.parent.unwrap().text, "parent");
    }

    #[test]
    fn test_split_record_uri() {
        assert_eq!(
            split_record_uri("at://did:plc:me/app.bsky.feed.like/3kl"),
            Some(("did:plc:me", "app.bsky.feed.like", "3kl"))
        );
        assert_eq!(split_record_uri("at://did:plc:me/app.bsky.feed.like"), None);
        assert_eq!(split_record_uri("https://example.com/a/b"), None);
    }
}
