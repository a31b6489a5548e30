//! # Source Selector
//! Maps a bias coordinate to a balanced set of sources:
//! nearest sources to the user (friendly), nearest to the mirrored point
//! (opposing), and neutral fill-ins from the origin when either side runs dry.
//!
//! Selection is a pure function of one catalog snapshot and the request, so
//! repeated calls against an unchanged catalog return the same ordered list.

use std::collections::HashSet;
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bias::BiasCoordinate;
use crate::catalog::{Catalog, CatalogHandle, Source};
use crate::error::SelectionError;
use crate::fallback::{run_chain, FallbackStage, Step};

pub const DEFAULT_FRIENDLY: usize = 2;
pub const DEFAULT_OPPOSING: usize = 2;
pub const DEFAULT_SEARCH_RADIUS: f64 = 2.0;

/// Picks after this many are subject to the diversity preference.
const DIVERSITY_FREE_PICKS: usize = 2;

/// Words dropped when reducing a source name to its organization.
static CORPORATE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "news", "media", "inc", "corp", "corporation", "co", "group", "network", "networks",
        "llc", "ltd", "plc", "online", "digital",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Friendly,
    Opposing,
    NeutralFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedSource {
    #[serde(flatten)]
    pub source: Source,
    pub role: Role,
    pub distance: f64,
    pub is_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub friendly_count: usize,
    pub opposing_count: usize,
    pub search_radius: f64,
    pub diversity: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            friendly_count: DEFAULT_FRIENDLY,
            opposing_count: DEFAULT_OPPOSING,
            search_radius: DEFAULT_SEARCH_RADIUS,
            diversity: true,
        }
    }
}

/// Result of a selection together with the fallback stage that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub stage: FallbackStage,
    pub sources: Vec<SelectedSource>,
}

pub struct SourceSelector {
    catalog: CatalogHandle,
    built_in: Arc<Catalog>,
    cfg: SelectorConfig,
}

impl SourceSelector {
    pub fn new(catalog: CatalogHandle, cfg: SelectorConfig) -> Self {
        Self {
            catalog,
            built_in: Arc::new(Catalog::built_in()),
            cfg,
        }
    }

    pub fn config(&self) -> &SelectorConfig {
        &self.cfg
    }

    /// `pick` with the configured counts and no category filter.
    pub fn pick_default(&self, bias: BiasCoordinate) -> Vec<SelectedSource> {
        self.pick(bias, self.cfg.friendly_count, self.cfg.opposing_count, None)
    }

    pub fn pick(
        &self,
        bias: BiasCoordinate,
        friendly_count: usize,
        opposing_count: usize,
        category: Option<&str>,
    ) -> Vec<SelectedSource> {
        self.select(bias, friendly_count, opposing_count, category)
            .sources
    }

    /// Full selection, never fails: faults degrade through the fallback chain.
    pub fn select(
        &self,
        bias: BiasCoordinate,
        friendly_count: usize,
        opposing_count: usize,
        category: Option<&str>,
    ) -> Selection {
        let total = friendly_count.saturating_add(opposing_count);
        if total == 0 {
            return Selection {
                stage: FallbackStage::Primary,
                sources: Vec::new(),
            };
        }

        // one snapshot for the whole request
        let snapshot = self.catalog.snapshot();
        let req = Request {
            bias,
            friendly_count,
            opposing_count,
            category,
        };

        let (stage, sources) = run_chain(
            FallbackStage::Primary,
            |stage| match stage {
                FallbackStage::Primary if snapshot.is_empty() => {
                    Step::TryNext("catalog snapshot is empty".into())
                }
                FallbackStage::Primary => match self.select_from(&snapshot, &req) {
                    Ok(v) => Step::Done(v),
                    Err(e) => Step::TryNext(e.to_string()),
                },
                FallbackStage::CatalogFallback => match self.select_from(&self.built_in, &req) {
                    Ok(mut v) => {
                        for s in v.iter_mut() {
                            s.is_fallback = true;
                        }
                        Step::Done(v)
                    }
                    Err(e) => Step::TryNext(e.to_string()),
                },
                FallbackStage::EmergencyFallback => Step::Done(self.emergency(total)),
            },
            || self.emergency(total),
        );

        if stage != FallbackStage::Primary {
            counter!("selection_fallback_total", "stage" => stage.as_str()).increment(1);
        }
        debug!(
            target: "selector",
            x = bias.x,
            y = bias.y,
            stage = stage.as_str(),
            picked = sources.len(),
            "sources selected"
        );
        Selection { stage, sources }
    }

    fn select_from(
        &self,
        catalog: &Catalog,
        req: &Request<'_>,
    ) -> Result<Vec<SelectedSource>, SelectionError> {
        let bias = req.bias;
        if !bias.is_finite() {
            return Err(SelectionError::NonFiniteBias {
                x: bias.x,
                y: bias.y,
            });
        }
        if !bias.in_range() {
            warn!(target: "selector", x = bias.x, y = bias.y, "bias coordinate outside [-1,1], selecting anyway");
        }

        let total = req.friendly_count.saturating_add(req.opposing_count);
        let radius = Some(self.cfg.search_radius);
        let mut picked = Picked::new(self.cfg.diversity);

        let friendly = ranked(
            &catalog.sources,
            &bias,
            radius,
            req.category,
            &picked.ids,
        );
        picked.take(friendly, req.friendly_count, Role::Friendly, false);

        let opposing = ranked(
            &catalog.sources,
            &bias.mirrored(),
            radius,
            req.category,
            &picked.ids,
        );
        picked.take(opposing, req.opposing_count, Role::Opposing, false);

        // Neutral fill from the origin, ignoring radius and category so a
        // narrow filter cannot starve the feed. Built-in sources are the last resort.
        for pool in [catalog, self.built_in.as_ref()] {
            let short = total.saturating_sub(picked.len());
            if short == 0 {
                break;
            }
            let neutral = ranked(
                &pool.sources,
                &BiasCoordinate::ORIGIN,
                None,
                None,
                &picked.ids,
            );
            picked.take(neutral, short, Role::NeutralFallback, true);
        }

        let mut out = picked.into_vec();
        out.truncate(total);
        if out.is_empty() {
            return Err(SelectionError::NoSources);
        }
        Ok(out)
    }

    /// Hardcoded list: built-in sources in catalog order, no geometry beyond
    /// reporting each source's distance from the origin.
    fn emergency(&self, total: usize) -> Vec<SelectedSource> {
        self.built_in
            .sources
            .iter()
            .take(total)
            .map(|s| SelectedSource {
                source: s.clone(),
                role: Role::NeutralFallback,
                distance: s.coordinate.distance(&BiasCoordinate::ORIGIN),
                is_fallback: true,
            })
            .collect()
    }
}

struct Request<'a> {
    bias: BiasCoordinate,
    friendly_count: usize,
    opposing_count: usize,
    category: Option<&'a str>,
}

/// Accumulator for one selection: keeps ids unique and tracks diversity keys.
struct Picked {
    out: Vec<SelectedSource>,
    ids: HashSet<String>,
    keys: HashSet<String>,
    diversity: bool,
}

impl Picked {
    fn new(diversity: bool) -> Self {
        Self {
            out: Vec::new(),
            ids: HashSet::new(),
            keys: HashSet::new(),
            diversity,
        }
    }

    fn len(&self) -> usize {
        self.out.len()
    }

    /// Take up to `n` from distance-ordered candidates. Past the free picks,
    /// candidates repeating an organization are deferred and only used when
    /// nothing else is left.
    fn take(&mut self, candidates: Vec<(&Source, f64)>, n: usize, role: Role, is_fallback: bool) {
        let mut taken = 0usize;
        let mut deferred = Vec::new();

        for (src, dist) in candidates {
            if taken == n {
                break;
            }
            let key = diversity_key(src);
            if self.diversity && self.out.len() >= DIVERSITY_FREE_PICKS && self.keys.contains(&key) {
                deferred.push((src, dist));
                continue;
            }
            self.push(src, dist, role, is_fallback, key);
            taken += 1;
        }

        for (src, dist) in deferred {
            if taken == n {
                break;
            }
            let key = diversity_key(src);
            self.push(src, dist, role, is_fallback, key);
            taken += 1;
        }
    }

    fn push(&mut self, src: &Source, distance: f64, role: Role, is_fallback: bool, key: String) {
        self.ids.insert(src.id.clone());
        self.keys.insert(key);
        self.out.push(SelectedSource {
            source: src.clone(),
            role,
            distance,
            is_fallback,
        });
    }

    fn into_vec(self) -> Vec<SelectedSource> {
        self.out
    }
}

/// Active sources sorted by distance from `from` (stable: catalog order breaks ties).
fn ranked<'c>(
    sources: &'c [Source],
    from: &BiasCoordinate,
    radius: Option<f64>,
    category: Option<&str>,
    exclude: &HashSet<String>,
) -> Vec<(&'c Source, f64)> {
    let mut out: Vec<(&Source, f64)> = sources
        .iter()
        .filter(|s| s.active && !exclude.contains(&s.id))
        .filter(|s| category.map_or(true, |c| s.category.eq_ignore_ascii_case(c)))
        .map(|s| (s, from.distance(&s.coordinate)))
        .filter(|(_, d)| radius.map_or(true, |r| *d <= r))
        .collect();
    out.sort_by(|a, b| a.1.total_cmp(&b.1));
    out
}

/// Organization name with corporate filler removed, e.g. "Fox News Inc." → "fox".
pub fn organization_key(name: &str) -> String {
    let lowered = name.to_ascii_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let core: Vec<&str> = words
        .iter()
        .copied()
        .filter(|w| !CORPORATE_WORDS.contains(w))
        .collect();
    if core.is_empty() {
        words.join(" ")
    } else {
        core.join(" ")
    }
}

fn diversity_key(src: &Source) -> String {
    format!("{}|{}", organization_key(&src.name), src.category)
}
