// src/services/fetcher.rs

//! Search-result crawler that populates the raw artifact tree.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{
    ArtifactKind, DocumentKey, FetchSummary, FetchedDocument, FetcherConfig, material_dir,
};
use crate::storage::ArtifactStore;
use crate::utils::http::{create_async_client, fetch_text};
use crate::utils::{resolve_url, same_name};

/// Source of raw documents for a material.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the documents of `material` into the raw tree of `store`.
    ///
    /// With `standard` set only rows carrying exactly that standard match.
    /// Existing raw artifacts are left untouched unless `overwrite` is set.
    async fn fetch(
        &self,
        material: &str,
        standard: Option<&str>,
        overwrite: bool,
        store: &dyn ArtifactStore,
    ) -> Result<FetchSummary>;
}

/// One result row of a search page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRow {
    pub name: String,
    pub standard: Option<String>,
    pub link: String,
}

/// Parsed search page.
#[derive(Debug, Default)]
pub struct SearchPage {
    pub rows: Vec<SearchRow>,
    /// Rows without a usable name link
    pub malformed: usize,
}

impl SearchPage {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.malformed == 0
    }
}

/// Fetcher walking the paginated material search of the source site.
pub struct SearchFetcher {
    config: FetcherConfig,
    row_sel: Selector,
    name_sel: Selector,
    standard_sel: Selector,
}

impl SearchFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let row_sel = Self::parse_selector(&config.row_selector)?;
        let name_sel = Self::parse_selector(&config.name_selector)?;
        let standard_sel = Self::parse_selector(&config.standard_selector)?;
        Ok(Self {
            config,
            row_sel,
            name_sel,
            standard_sel,
        })
    }

    /// Extract result rows from a search page.
    pub fn parse_search_page(&self, html: &str, base_url: &Url) -> SearchPage {
        let document = Html::parse_document(html);
        let mut page = SearchPage::default();

        for row in document.select(&self.row_sel) {
            match self.parse_row(&row, base_url) {
                Some(parsed) => page.rows.push(parsed),
                None => page.malformed += 1,
            }
        }
        page
    }

    fn parse_row(&self, row: &ElementRef, base_url: &Url) -> Option<SearchRow> {
        let name_elem = row.select(&self.name_sel).next()?;
        let name = name_elem.text().collect::<String>().trim().to_string();
        let href = name_elem.value().attr("href")?;
        if name.is_empty() || href.trim().is_empty() {
            return None;
        }

        let standard = row
            .select(&self.standard_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());

        Some(SearchRow {
            name,
            standard,
            link: resolve_url(base_url, href.trim()),
        })
    }

    fn matches(row: &SearchRow, material: &str, standard: Option<&str>) -> bool {
        same_name(&row.name, material)
            && standard.is_none_or(|wanted| row.standard.as_deref() == Some(wanted))
    }

    /// Key for a matched row that no earlier row of this fetch has claimed.
    fn claim_key(row: &SearchRow, claimed: &mut HashSet<DocumentKey>) -> Result<DocumentKey> {
        let base = match &row.standard {
            Some(standard) => DocumentKey::for_standard(&row.name, standard)?,
            None => DocumentKey::for_capture(&row.name, Utc::now())?,
        };
        let mut key = base.clone();
        let mut ordinal = 1;
        while claimed.contains(&key) {
            ordinal += 1;
            key = base.with_ordinal(ordinal);
        }
        claimed.insert(key.clone());
        Ok(key)
    }

    /// Fetch one matched detail page and store it as a raw artifact.
    ///
    /// Returns `None` when the key already existed and was kept.
    async fn fetch_detail(
        &self,
        client: &Client,
        row: &SearchRow,
        key: &DocumentKey,
        dir: &str,
        overwrite: bool,
        store: &dyn ArtifactStore,
    ) -> Result<Option<FetchedDocument>> {
        let html = fetch_text(client, &row.link).await?;

        let written = if overwrite {
            store
                .write(ArtifactKind::Raw, dir, key, html.as_bytes())
                .await?;
            true
        } else {
            store
                .write_new(ArtifactKind::Raw, dir, key, html.as_bytes())
                .await?
        };
        if !written {
            return Ok(None);
        }

        let created_at = store
            .created_at(ArtifactKind::Raw, dir, key)
            .await?
            .unwrap_or_else(Utc::now);
        log::info!("    Saved {}", store.location(ArtifactKind::Raw, dir, key));
        Ok(Some(FetchedDocument {
            key: key.clone(),
            standard: row.standard.clone(),
            created_at,
            bytes: html.len(),
        }))
    }

    fn parse_selector(selector: &str) -> Result<Selector> {
        Selector::parse(selector).map_err(|e| AppError::selector(selector, format!("{e:?}")))
    }
}

#[async_trait]
impl Fetcher for SearchFetcher {
    async fn fetch(
        &self,
        material: &str,
        standard: Option<&str>,
        overwrite: bool,
        store: &dyn ArtifactStore,
    ) -> Result<FetchSummary> {
        let dir = material_dir(material)?;
        // One client per fetch; nothing outlives the call.
        let client = create_async_client(&self.config)?;
        let delay = self.config.request_delay();
        let mut summary = FetchSummary::default();
        let mut claimed = HashSet::new();

        for page_num in 1..=self.config.max_pages {
            if page_num > 1 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let url = self.config.search_page_url(material, page_num);
            let base_url = Url::parse(&url)?;
            log::debug!("Visiting {}", url);
            let html = fetch_text(&client, &url)
                .await
                .map_err(|e| AppError::fetch(material, e))?;

            let page = self.parse_search_page(&html, &base_url);
            summary.pages_visited += 1;
            if page.is_empty() {
                log::info!("    Page {} has no results, stopping", page_num);
                break;
            }
            log::info!("    Page {}: {} result rows", page_num, page.rows.len());
            summary.unmatched_rows += page.malformed;

            let mut matched = false;
            for row in &page.rows {
                if !Self::matches(row, material, standard) {
                    log::debug!(
                        "Skipping row {} ({})",
                        row.name,
                        row.standard.as_deref().unwrap_or("-")
                    );
                    summary.unmatched_rows += 1;
                    continue;
                }

                if matched && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                matched = true;
                let key = Self::claim_key(row, &mut claimed)
                    .map_err(|e| AppError::fetch(material, e))?;
                let fetched = self
                    .fetch_detail(&client, row, &key, &dir, overwrite, store)
                    .await
                    .map_err(|e| AppError::fetch(material, format!("{}: {}", row.link, e)))?;
                match fetched {
                    Some(document) => summary.written.push(document),
                    None => {
                        log::info!("    Kept existing {}", key);
                        summary.kept_existing.push(key);
                    }
                }
            }

            if matched {
                break;
            }
            log::info!("    No match on page {}", page_num);
        }

        if summary.written.is_empty() && summary.kept_existing.is_empty() {
            log::warn!("No matching search result for {}", material);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS: &str = r#"<html><body>
<table class="layui-table head-sticky"><tbody>
<tr><td>1</td><td><a href="/material/detail/1.html">18CrMo4</a></td><td><b>NF EN 10084-2008</b></td></tr>
<tr><td>2</td><td><a href="/material/detail/2.html">18 CrMo 4</a></td><td><b>DIN EN 10084-2008</b></td></tr>
<tr><td>3</td><td><a href="/material/detail/3.html">18CrMo4V</a></td><td><b>GB/T 3077</b></td></tr>
<tr><td>4</td><td>no link</td><td><b>ISO 683</b></td></tr>
</tbody></table>
</body></html>"#;

    const EMPTY: &str = r#"<html><body>
<table class="layui-table head-sticky"><tbody></tbody></table>
</body></html>"#;

    fn fetcher(server: &MockServer) -> SearchFetcher {
        SearchFetcher::new(FetcherConfig {
            search_url: format!("{}/material/?keyword={{keyword}}&page={{page}}", server.uri()),
            request_delay_ms: 0,
            ..FetcherConfig::default()
        })
        .unwrap()
    }

    async fn mount_search(server: &MockServer, page: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/material/"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_detail(server: &MockServer, id: u32) {
        Mock::given(method("GET"))
            .and(path(format!("/material/detail/{id}.html")))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!("<p>detail {id}</p>")))
            .mount(server)
            .await;
    }

    #[test]
    fn test_parse_search_page() {
        let fetcher = SearchFetcher::new(FetcherConfig::default()).unwrap();
        let base = Url::parse("https://www.caishuku.com/material/?keyword=18CrMo4").unwrap();
        let page = fetcher.parse_search_page(RESULTS, &base);

        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.malformed, 1);
        assert_eq!(page.rows[1].name, "18 CrMo 4");
        assert_eq!(page.rows[1].standard.as_deref(), Some("DIN EN 10084-2008"));
        assert_eq!(
            page.rows[0].link,
            "https://www.caishuku.com/material/detail/1.html"
        );
        assert!(fetcher.parse_search_page(EMPTY, &base).is_empty());
    }

    #[tokio::test]
    async fn test_fetch_writes_matching_rows() {
        let server = MockServer::start().await;
        mount_search(&server, "1", RESULTS).await;
        mount_detail(&server, 1).await;
        mount_detail(&server, 2).await;
        Mock::given(method("GET"))
            .and(path("/material/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY))
            .expect(0)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("18CrMo4", None, false, &store)
            .await
            .unwrap();

        let keys: Vec<&str> = summary.written.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["18CrMo4_NF_EN_10084-2008", "18CrMo4_DIN_EN_10084-2008"]
        );
        assert_eq!(summary.unmatched_rows, 2);
        assert_eq!(summary.pages_visited, 1);

        let key = DocumentKey::new("18CrMo4_NF_EN_10084-2008").unwrap();
        let bytes = store
            .read(ArtifactKind::Raw, "18CrMo4", &key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"<p>detail 1</p>");
    }

    #[tokio::test]
    async fn test_fetch_filters_by_standard() {
        let server = MockServer::start().await;
        mount_search(&server, "1", RESULTS).await;
        mount_detail(&server, 2).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("18CrMo4", Some("DIN EN 10084-2008"), false, &store)
            .await
            .unwrap();

        assert_eq!(summary.written.len(), 1);
        assert_eq!(summary.written[0].key.as_str(), "18CrMo4_DIN_EN_10084-2008");
        assert_eq!(
            summary.written[0].standard.as_deref(),
            Some("DIN EN 10084-2008")
        );
    }

    #[tokio::test]
    async fn test_fetch_continues_to_next_page_without_match() {
        let server = MockServer::start().await;
        mount_search(&server, "1", RESULTS).await;
        mount_search(&server, "2", EMPTY).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("42CrMo4", None, false, &store)
            .await
            .unwrap();

        assert!(summary.written.is_empty());
        assert_eq!(summary.pages_visited, 2);
        assert_eq!(summary.unmatched_rows, 4);
    }

    #[tokio::test]
    async fn test_fetch_empty_first_page() {
        let server = MockServer::start().await;
        mount_search(&server, "1", EMPTY).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("18CrMo4", None, false, &store)
            .await
            .unwrap();

        assert!(summary.written.is_empty());
        assert_eq!(summary.pages_visited, 1);
        assert_eq!(summary.unmatched_rows, 0);
    }

    #[tokio::test]
    async fn test_fetch_keeps_existing_raw_artifact() {
        let server = MockServer::start().await;
        mount_search(&server, "1", RESULTS).await;
        mount_detail(&server, 1).await;
        mount_detail(&server, 2).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let key = DocumentKey::new("18CrMo4_NF_EN_10084-2008").unwrap();
        store
            .write(ArtifactKind::Raw, "18CrMo4", &key, b"original")
            .await
            .unwrap();

        let summary = fetcher(&server)
            .fetch("18CrMo4", None, false, &store)
            .await
            .unwrap();
        assert_eq!(summary.kept_existing, vec![key.clone()]);
        assert_eq!(summary.written.len(), 1);
        let bytes = store.read(ArtifactKind::Raw, "18CrMo4", &key).await.unwrap();
        assert_eq!(bytes.unwrap(), b"original");

        let summary = fetcher(&server)
            .fetch("18CrMo4", None, true, &store)
            .await
            .unwrap();
        assert_eq!(summary.written.len(), 2);
        let bytes = store.read(ArtifactKind::Raw, "18CrMo4", &key).await.unwrap();
        assert_eq!(bytes.unwrap(), b"<p>detail 1</p>");
    }

    #[tokio::test]
    async fn test_fetch_row_without_standard_uses_capture_key() {
        let server = MockServer::start().await;
        let body = r#"<table class="layui-table head-sticky"><tbody>
<tr><td>1</td><td><a href="/material/detail/7.html">C45</a></td><td></td></tr>
</tbody></table>"#;
        mount_search(&server, "1", body).await;
        mount_detail(&server, 7).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("C45", None, false, &store)
            .await
            .unwrap();

        assert_eq!(summary.written.len(), 1);
        let key = summary.written[0].key.as_str();
        assert!(key.starts_with("C45_"));
        assert_eq!(key.len(), "C45_20240318_123456".len());
        assert!(summary.written[0].standard.is_none());
    }

    #[tokio::test]
    async fn test_fetch_detail_error_aborts() {
        let server = MockServer::start().await;
        mount_search(&server, "1", RESULTS).await;
        Mock::given(method("GET"))
            .and(path("/material/detail/1.html"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let err = fetcher(&server)
            .fetch("18CrMo4", None, false, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_fetch_search_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/material/"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let result = fetcher(&server).fetch("18CrMo4", None, false, &store).await;
        assert!(matches!(result, Err(AppError::Fetch { .. })));
    }

    #[tokio::test]
    async fn test_fetch_colliding_rows_get_distinct_keys() {
        let server = MockServer::start().await;
        let body = r#"<table class="layui-table head-sticky"><tbody>
<tr><td>1</td><td><a href="/material/detail/1.html">C45</a></td><td><b>EN 10083-2</b></td></tr>
<tr><td>2</td><td><a href="/material/detail/2.html">C 45</a></td><td><b>EN 10083-2</b></td></tr>
</tbody></table>"#;
        mount_search(&server, "1", body).await;
        mount_detail(&server, 1).await;
        mount_detail(&server, 2).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("C45", None, false, &store)
            .await
            .unwrap();

        let keys: Vec<&str> = summary.written.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["C45_EN_10083-2", "C45_EN_10083-2_2"]);
        assert!(summary.kept_existing.is_empty());

        let second = DocumentKey::new("C45_EN_10083-2_2").unwrap();
        let bytes = store.read(ArtifactKind::Raw, "C45", &second).await.unwrap();
        assert_eq!(bytes.unwrap(), b"<p>detail 2</p>");
    }

    #[tokio::test]
    async fn test_fetch_rows_without_standard_are_all_kept() {
        let server = MockServer::start().await;
        let body = r#"<table class="layui-table head-sticky"><tbody>
<tr><td>1</td><td><a href="/material/detail/1.html">C45</a></td><td></td></tr>
<tr><td>2</td><td><a href="/material/detail/2.html">C 45</a></td><td></td></tr>
</tbody></table>"#;
        mount_search(&server, "1", body).await;
        mount_detail(&server, 1).await;
        mount_detail(&server, 2).await;

        let temp = TempDir::new().unwrap();
        let store = LocalStorage::new(temp.path());
        let summary = fetcher(&server)
            .fetch("C45", None, true, &store)
            .await
            .unwrap();

        assert_eq!(summary.written.len(), 2);
        assert_ne!(summary.written[0].key, summary.written[1].key);
        let keys = store.list_keys(ArtifactKind::Raw, "C45").await.unwrap().unwrap();
        assert_eq!(keys.len(), 2);
    }
}
