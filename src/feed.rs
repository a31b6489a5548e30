//! # Feed Assembly
//! bias → cached feed, or: select sources → fetch their articles → one card
//! per source → cache → return.
//!
//! Provider failures propagate (a silently partial feed is worse than an
//! error); empty selections and empty article batches do not.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::bias::BiasCoordinate;
use crate::cache::TieredCache;
use crate::error::{FeedError, UpstreamProviderError, ValidationError};
use crate::provider::{ArticleProvider, RawArticle};
use crate::selector::{Role, SelectedSource, SourceSelector};

pub const DEFAULT_FEED_TTL: Duration = Duration::from_secs(1800);
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(8);

/// Placeholder title the upstream uses for withdrawn articles.
const REMOVED_TITLE: &str = "[Removed]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCard {
    pub article_id: String,
    pub title: String,
    pub source_id: String,
    pub source_name: String,
    pub image_url: Option<String>,
    pub url: String,
    pub published_at: Option<String>,
    pub role: Role,
    pub description: Option<String>,
    pub is_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Feed {
    pub cards: Vec<FeedCard>,
    /// Served from the cache without touching the provider.
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ttl: Duration,
    pub provider_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_FEED_TTL,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }
}

pub fn feed_cache_key(bias: &BiasCoordinate) -> String {
    format!("feed:{}", bias.cache_fragment())
}

pub fn article_cache_key(bias: &BiasCoordinate, article_id: &str) -> String {
    format!("article:{}:{}", bias.cache_fragment(), article_id)
}

/// Stable short id derived from the article URL.
pub fn article_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

pub struct FeedAssembler {
    selector: Arc<SourceSelector>,
    provider: Arc<dyn ArticleProvider>,
    cache: Arc<TieredCache>,
    cfg: FeedConfig,
}

impl FeedAssembler {
    pub fn new(
        selector: Arc<SourceSelector>,
        provider: Arc<dyn ArticleProvider>,
        cache: Arc<TieredCache>,
        cfg: FeedConfig,
    ) -> Self {
        Self {
            selector,
            provider,
            cache,
            cfg,
        }
    }

    pub async fn get_feed(
        &self,
        bias: BiasCoordinate,
        force_refresh: bool,
    ) -> Result<Feed, FeedError> {
        if !bias.x.is_finite() {
            return Err(ValidationError::NotFinite { axis: "x" }.into());
        }
        if !bias.y.is_finite() {
            return Err(ValidationError::NotFinite { axis: "y" }.into());
        }
        counter!("feed_requests_total").increment(1);

        let key = feed_cache_key(&bias);
        if !force_refresh {
            if let Some(cards) = self.cached_cards(&key).await {
                counter!("feed_cache_hits_total").increment(1);
                debug!(target: "feed", %key, cards = cards.len(), "feed cache hit");
                return Ok(Feed { cards, cached: true });
            }
        }
        counter!("feed_cache_misses_total").increment(1);

        let selected = self.selector.pick_default(bias);
        if selected.is_empty() {
            return Ok(Feed {
                cards: Vec::new(),
                cached: false,
            });
        }

        let ids: Vec<String> = selected.iter().map(|s| s.source.id.clone()).collect();
        let articles = self.fetch(&ids).await?;
        let cards = match_articles(&selected, articles);

        if cards.is_empty() {
            warn!(target: "feed", %key, sources = ids.len(), "no articles for selected sources");
        } else {
            self.store(&bias, &key, &cards).await;
        }
        info!(
            target: "feed",
            %key,
            sources = ids.len(),
            cards = cards.len(),
            fallbacks = cards.iter().filter(|c| c.is_fallback).count(),
            "feed assembled"
        );
        Ok(Feed {
            cards,
            cached: false,
        })
    }

    /// One card from a previously assembled feed for the same bias.
    pub async fn get_article(&self, bias: BiasCoordinate, article_id: &str) -> Option<FeedCard> {
        if let Some(bytes) = self.cache.get(&article_cache_key(&bias, article_id)).await {
            if let Ok(card) = serde_json::from_slice::<FeedCard>(&bytes) {
                return Some(card);
            }
        }
        self.cached_cards(&feed_cache_key(&bias))
            .await?
            .into_iter()
            .find(|c| c.article_id == article_id)
    }

    async fn fetch(&self, ids: &[String]) -> Result<Vec<RawArticle>, UpstreamProviderError> {
        let call = self.provider.fetch_articles_for_sources(ids);
        let result = match tokio::time::timeout(self.cfg.provider_timeout, call).await {
            Ok(r) => r,
            Err(_) => Err(UpstreamProviderError::Timeout {
                ms: self.cfg.provider_timeout.as_millis() as u64,
            }),
        };
        if let Err(e) = &result {
            counter!("feed_provider_errors_total", "provider" => self.provider.name()).increment(1);
            warn!(target: "feed", provider = self.provider.name(), error = %e, "article fetch failed");
        }
        result
    }

    async fn cached_cards(&self, key: &str) -> Option<Vec<FeedCard>> {
        let bytes = self.cache.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(cards) => Some(cards),
            Err(e) => {
                warn!(target: "feed", key, error = %e, "unreadable cache entry, rebuilding");
                None
            }
        }
    }

    async fn store(&self, bias: &BiasCoordinate, key: &str, cards: &[FeedCard]) {
        let ttl = Some(self.cfg.ttl);
        match serde_json::to_vec(cards) {
            Ok(bytes) => self.cache.set(key, bytes, ttl).await,
            Err(e) => {
                warn!(target: "feed", key, error = %e, "feed not cached");
                return;
            }
        }
        for card in cards {
            if let Ok(bytes) = serde_json::to_vec(card) {
                self.cache
                    .set(&article_cache_key(bias, &card.article_id), bytes, ttl)
                    .await;
            }
        }
    }
}

fn is_usable(a: &RawArticle) -> bool {
    !a.url.trim().is_empty() && a.title.trim() != REMOVED_TITLE
}

/// One card per selected source, in selection order.
///
/// Every source first claims its own article. Sources still empty then
/// borrow an unused article, preferring ones from outside the selection,
/// and the card is marked as a fallback. Sources left with nothing are
/// omitted.
pub fn match_articles(selected: &[SelectedSource], articles: Vec<RawArticle>) -> Vec<FeedCard> {
    let articles: Vec<RawArticle> = articles.into_iter().filter(is_usable).collect();
    let mut used = vec![false; articles.len()];
    let mut assigned: Vec<Option<(usize, bool)>> = vec![None; selected.len()];

    for (slot, sel) in assigned.iter_mut().zip(selected) {
        let exact = articles
            .iter()
            .enumerate()
            .position(|(i, a)| !used[i] && a.source.id.as_deref() == Some(sel.source.id.as_str()));
        if let Some(i) = exact {
            used[i] = true;
            *slot = Some((i, false));
        }
    }

    let selected_ids: HashSet<&str> = selected.iter().map(|s| s.source.id.as_str()).collect();
    let outsider = |a: &RawArticle| {
        a.source
            .id
            .as_deref()
            .map_or(true, |id| !selected_ids.contains(id))
    };
    for slot in assigned.iter_mut().filter(|s| s.is_none()) {
        let borrowed = (0..articles.len())
            .find(|&i| !used[i] && outsider(&articles[i]))
            .or_else(|| used.iter().position(|u| !u));
        if let Some(i) = borrowed {
            used[i] = true;
            *slot = Some((i, true));
        }
    }

    selected
        .iter()
        .zip(assigned)
        .filter_map(|(sel, slot)| slot.map(|(i, borrowed)| build_card(sel, &articles[i], borrowed)))
        .collect()
}

fn build_card(sel: &SelectedSource, a: &RawArticle, borrowed: bool) -> FeedCard {
    let (source_id, source_name) = if borrowed {
        (
            a.source.id.clone().unwrap_or_default(),
            a.source.name.clone(),
        )
    } else {
        (sel.source.id.clone(), sel.source.name.clone())
    };
    FeedCard {
        article_id: article_id(&a.url),
        title: a.title.trim().to_string(),
        source_id,
        source_name,
        image_url: a.url_to_image.clone(),
        url: a.url.clone(),
        published_at: a.published_at.clone(),
        role: sel.role,
        description: a.description.clone(),
        is_fallback: sel.is_fallback || borrowed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Source;
    use crate::provider::ArticleSource;

    fn sel(id: &str, role: Role) -> SelectedSource {
        SelectedSource {
            source: Source::new(id, &id.to_uppercase(), 0.0, 0.0, "general"),
            role,
            distance: 0.0,
            is_fallback: false,
        }
    }

    fn art(source: Option<&str>, url: &str) -> RawArticle {
        RawArticle {
            title: format!("title {url}"),
            url: url.to_string(),
            url_to_image: None,
            published_at: None,
            description: None,
            source: ArticleSource {
                id: source.map(str::to_string),
                name: source.unwrap_or("Unknown").to_string(),
            },
        }
    }

    #[test]
    fn keys_share_rounded_precision() {
        let a = BiasCoordinate { x: 0.1234, y: -0.5 };
        let b = BiasCoordinate { x: 0.1231, y: -0.5004 };
        assert_eq!(feed_cache_key(&a), "feed:0.123:-0.500");
        assert_eq!(feed_cache_key(&a), feed_cache_key(&b));
        assert_eq!(article_cache_key(&a, "ab12"), "article:0.123:-0.500:ab12");
    }

    #[test]
    fn article_id_is_stable_hex() {
        let id = article_id("https://example.com/a");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, article_id("https://example.com/a"));
        assert_ne!(id, article_id("https://example.com/b"));
    }

    #[test]
    fn exact_matches_win_and_each_article_is_used_once() {
        let selected = vec![sel("a", Role::Friendly), sel("b", Role::Opposing)];
        let articles = vec![art(Some("b"), "u1"), art(Some("a"), "u2"), art(Some("a"), "u3")];
        let cards = match_articles(&selected, articles);
        assert_eq!(cards.len(), 2);
        assert_eq!((cards[0].source_id.as_str(), cards[0].url.as_str()), ("a", "u2"));
        assert_eq!((cards[1].source_id.as_str(), cards[1].url.as_str()), ("b", "u1"));
        assert!(cards.iter().all(|c| !c.is_fallback));
    }

    #[test]
    fn unmatched_source_borrows_remaining_article() {
        let selected = vec![sel("a", Role::Friendly), sel("b", Role::Opposing)];
        let articles = vec![art(Some("a"), "u1"), art(Some("x"), "u2")];
        let cards = match_articles(&selected, articles);
        assert_eq!(cards.len(), 2);
        assert!(!cards[0].is_fallback);
        assert!(cards[1].is_fallback);
        assert_eq!(cards[1].role, Role::Opposing);
        assert_eq!(cards[1].source_id, "x");
    }

    #[test]
    fn borrowing_never_takes_a_later_sources_own_article() {
        let selected = vec![sel("a", Role::Friendly), sel("b", Role::Opposing)];
        let articles = vec![art(Some("b"), "b1"), art(Some("x"), "x1")];
        let cards = match_articles(&selected, articles);
        assert_eq!(cards.len(), 2);

        assert_eq!(cards[0].role, Role::Friendly);
        assert_eq!((cards[0].source_id.as_str(), cards[0].url.as_str()), ("x", "x1"));
        assert!(cards[0].is_fallback);

        assert_eq!((cards[1].source_id.as_str(), cards[1].url.as_str()), ("b", "b1"));
        assert!(!cards[1].is_fallback);
    }

    #[test]
    fn leftover_selected_article_is_borrowed_last() {
        let selected = vec![sel("a", Role::Friendly), sel("b", Role::Opposing)];
        let articles = vec![art(Some("b"), "b1"), art(Some("b"), "b2")];
        let cards = match_articles(&selected, articles);
        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].url, "b2");
        assert!(cards[0].is_fallback);
        assert_eq!(cards[1].url, "b1");
        assert!(!cards[1].is_fallback);
    }

    #[test]
    fn sources_without_articles_are_omitted() {
        let selected = vec![
            sel("a", Role::Friendly),
            sel("b", Role::Friendly),
            sel("c", Role::Opposing),
        ];
        let mut removed = art(Some("b"), "u9");
        removed.title = REMOVED_TITLE.to_string();
        let cards = match_articles(&selected, vec![art(Some("a"), "u1"), removed]);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].source_id, "a");
    }

    #[test]
    fn card_json_uses_camel_case() {
        let cards = match_articles(&[sel("a", Role::NeutralFallback)], vec![art(Some("a"), "u1")]);
        let v = serde_json::to_value(&cards[0]).unwrap();
        assert!(v.get("articleId").is_some());
        assert!(v.get("isFallback").is_some());
        assert_eq!(v["role"], "neutral-fallback");
    }
}
