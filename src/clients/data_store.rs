/// Supabase PostgREST からアイテムとイベントを取得するクライアント。
///
/// まず結合済みの RPC を試し、失敗した場合はテーブルを個別に取得する。
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Url};
use tracing::{debug, info, warn};

use super::headers::build_service_headers;
use crate::appeal::types::{Event, Item, ItemWithEvents};

const ITEMS_WITH_EVENTS_RPC: &str = "rpc/get_items_with_events";

/// アイテムと、その評価に使うイベントの組。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTrainingData {
    pub items: Vec<Item>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct DataStoreClient {
    client: Client,
    rest_url: Url,
}

impl DataStoreClient {
    /// `supabase_url` 配下の `rest/v1/` を対象にクライアントを作成する。
    ///
    /// # Errors
    /// URL のパース、認証ヘッダーの構築、HTTP クライアントの構築のいずれかに失敗した場合。
    pub fn new(supabase_url: &str, service_key: &str, timeout: Option<Duration>) -> Result<Self> {
        let headers = build_service_headers(service_key)?;
        let mut builder = Client::builder().default_headers(headers);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .context("failed to build data store HTTP client")?;
        let rest_url = Url::parse(&format!("{}/rest/v1/", supabase_url.trim_end_matches('/')))
            .context("invalid supabase URL")?;

        Ok(Self { client, rest_url })
    }

    /// 学習用のアイテムとイベントを取得する。
    ///
    /// RPC が成功し、行にイベントが埋め込まれていればそれを使う。埋め込みが無ければ
    /// イベントだけを別途取得する。RPC が失敗した場合はアイテムも個別に取得する。
    ///
    /// # Errors
    /// 通信エラー、またはフォールバック側の取得が非 2xx を返した場合。
    pub async fn fetch_training_data(&self) -> Result<RawTrainingData> {
        if let Some(rows) = self.items_with_events().await? {
            info!(items = rows.len(), "fetched items via RPC");
            let embeds_events = rows.iter().any(|row| row.events.is_some());
            let mut items = Vec::with_capacity(rows.len());
            let mut events = Vec::new();
            for row in rows {
                if let Some(embedded) = row.events {
                    events.extend(
                        embedded
                            .into_iter()
                            .map(|event| event.into_event(row.item.id.clone())),
                    );
                }
                items.push(row.item);
            }

            if !embeds_events {
                events = self.events().await?;
            }
            info!(events = events.len(), "fetched events");
            return Ok(RawTrainingData { items, events });
        }

        let items = self.items().await?;
        info!(items = items.len(), "fetched items");
        let events = self.events().await?;
        info!(events = events.len(), "fetched events");
        Ok(RawTrainingData { items, events })
    }

    /// 結合済み RPC を呼ぶ。非 2xx の場合は `None` を返す。
    ///
    /// # Errors
    /// 通信エラーまたは 2xx 応答のパースに失敗した場合。
    pub async fn items_with_events(&self) -> Result<Option<Vec<ItemWithEvents>>> {
        let url = self
            .rest_url
            .join(ITEMS_WITH_EVENTS_RPC)
            .context("failed to build RPC URL")?;

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("items-with-events RPC request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "items-with-events RPC unavailable; falling back to table queries");
            return Ok(None);
        }

        let rows = response
            .json::<Vec<ItemWithEvents>>()
            .await
            .context("failed to deserialize items-with-events RPC response")?;
        Ok(Some(rows))
    }

    /// タイトルを持つアイテムを取得する。
    ///
    /// # Errors
    /// 通信エラー、非 2xx 応答、パース失敗の場合。
    pub async fn items(&self) -> Result<Vec<Item>> {
        self.select(
            "items",
            &[("select", "id,title,description"), ("title", "not.is.null")],
        )
        .await
    }

    /// 評価計算に必要な列だけイベントを取得する。
    ///
    /// # Errors
    /// 通信エラー、非 2xx 応答、パース失敗の場合。
    pub async fn events(&self) -> Result<Vec<Event>> {
        self.select(
            "events",
            &[("select", "item_id,event_type,strength,created_at")],
        )
        .await
    }

    async fn select<T: serde::de::DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut url = self
            .rest_url
            .join(table)
            .with_context(|| format!("failed to build {table} URL"))?;
        {
            let mut query_pairs = url.query_pairs_mut();
            for (key, value) in params {
                query_pairs.append_pair(key, value);
            }
        }
        debug!(table, "querying data store");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("{table} request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to fetch {table}: {status}: {body}");
        }

        response
            .json::<Vec<T>>()
            .await
            .with_context(|| format!("failed to deserialize {table} response"))
    }
}
