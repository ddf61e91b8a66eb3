//! Address resolution boundary.
//!
//! Concrete geocoding services live outside this crate. What lives here is
//! the query model, the attempt chain that retries a query in progressively
//! looser forms, a result cache, and turning resolved rows into `Stop`s.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use crate::types::{GeoPoint, Stop, StopId};

/// Structured address as imported from a stop list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressQuery {
    pub street: String,
    #[serde(default)]
    pub house_number: String,
    #[serde(default)]
    pub city: String,
}

impl AddressQuery {
    pub fn new(street: impl Into<String>, house_number: impl Into<String>, city: impl Into<String>) -> Self {
        AddressQuery {
            street: street.into().trim().to_string(),
            house_number: house_number.into().trim().to_string(),
            city: city.into().trim().to_string(),
        }
    }

    /// Split `"Main Street 9a, Town"` into street, house number and city.
    ///
    /// The house number is the trailing token, suffixes kept verbatim
    /// (`9a`, `12/3`, `4-6`). Anything after a second comma is ignored.
    pub fn parse(combined: &str) -> Self {
        let mut parts = combined.splitn(2, ',');
        let address = parts.next().unwrap_or_default().trim();
        let city = parts
            .next()
            .and_then(|rest| rest.split(',').next())
            .unwrap_or_default()
            .trim();

        match address.rsplit_once(char::is_whitespace) {
            Some((street, number)) => AddressQuery::new(street.trim_end(), number, city),
            None => AddressQuery::new("", address, city),
        }
    }

    /// `street|house|city`
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.street, self.house_number, self.city)
    }

    /// Leading digits of the house number (`"9a"` -> `"9"`).
    pub fn numeric_house_number(&self) -> Option<&str> {
        let end = self
            .house_number
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.house_number.len());
        if end == 0 {
            None
        } else {
            Some(&self.house_number[..end])
        }
    }

    /// The query rewritten for one attempt, or `None` if the attempt would
    /// repeat an earlier form.
    pub fn for_attempt(&self, attempt: QueryForm) -> Option<AddressQuery> {
        match attempt {
            QueryForm::Exact => Some(self.clone()),
            QueryForm::NumericHouseNumber => {
                let numeric = self.numeric_house_number()?;
                if numeric == self.house_number {
                    return None;
                }
                Some(AddressQuery {
                    house_number: numeric.to_string(),
                    ..self.clone()
                })
            }
            QueryForm::StreetOnly => {
                if self.house_number.is_empty() {
                    return None;
                }
                Some(AddressQuery {
                    house_number: String::new(),
                    ..self.clone()
                })
            }
        }
    }
}

impl std::fmt::Display for AddressQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.street, self.house_number)?;
        if !self.city.is_empty() {
            write!(f, ", {}", self.city)?;
        }
        Ok(())
    }
}

/// Successive query rewrites, strict to loose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryForm {
    Exact,
    /// House number suffix dropped (`9a` -> `9`)
    NumericHouseNumber,
    /// House number dropped entirely
    StreetOnly,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GeocodeHit {
    pub point: GeoPoint,
    /// Resolved from a loosened query
    pub approximate: bool,
}

/// Address lookup service.
pub trait Geocoder: Send + Sync {
    fn resolve(&self, query: &AddressQuery) -> impl Future<Output = Option<GeocodeHit>> + Send;
}

/// Fixed table lookup, for prepared gazetteers and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticGeocoder {
    entries: HashMap<String, GeoPoint>,
}

impl StaticGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: &AddressQuery, point: GeoPoint) {
        self.entries.insert(query.cache_key(), point);
    }
}

impl Geocoder for StaticGeocoder {
    async fn resolve(&self, query: &AddressQuery) -> Option<GeocodeHit> {
        self.entries.get(&query.cache_key()).map(|&point| GeocodeHit {
            point,
            approximate: false,
        })
    }
}

/// Ordered attempts against one geocoder; the first hit wins.
pub struct ResolverChain<G> {
    geocoder: G,
    attempts: Vec<QueryForm>,
}

impl<G: Geocoder> ResolverChain<G> {
    pub fn new(geocoder: G, attempts: Vec<QueryForm>) -> Self {
        ResolverChain { geocoder, attempts }
    }

    /// Exact, then numeric house number, then street only.
    pub fn with_default_attempts(geocoder: G) -> Self {
        Self::new(
            geocoder,
            vec![
                QueryForm::Exact,
                QueryForm::NumericHouseNumber,
                QueryForm::StreetOnly,
            ],
        )
    }
}

impl<G: Geocoder> Geocoder for ResolverChain<G> {
    async fn resolve(&self, query: &AddressQuery) -> Option<GeocodeHit> {
        for &attempt in &self.attempts {
            let Some(rewritten) = query.for_attempt(attempt) else {
                continue;
            };
            if let Some(mut hit) = self.geocoder.resolve(&rewritten).await {
                hit.approximate |= attempt != QueryForm::Exact;
                log::debug!("resolved {} via {:?}", query, attempt);
                return Some(hit);
            }
        }
        log::warn!("no geocoding result for {}", query);
        None
    }
}

/// Remembers hits by `street|house|city`. Misses are not cached.
pub struct CachedGeocoder<G> {
    inner: G,
    cache: Mutex<HashMap<String, GeocodeHit>>,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G) -> Self {
        CachedGeocoder {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn lookup(&self, key: &str) -> Option<GeocodeHit> {
        self.cache.lock().ok()?.get(key).cloned()
    }
}

impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn resolve(&self, query: &AddressQuery) -> Option<GeocodeHit> {
        let key = query.cache_key();
        if let Some(hit) = self.lookup(&key) {
            return Some(hit);
        }
        let hit = self.inner.resolve(query).await?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, hit.clone());
        }
        Some(hit)
    }
}

/// One row of an imported stop list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AddressRow {
    #[serde(flatten)]
    pub address: AddressQuery,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnresolvedRow {
    /// Position in the input
    pub row: usize,
    pub address: AddressQuery,
    pub reason: &'static str,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub stops: Vec<Stop>,
    pub unresolved: Vec<UnresolvedRow>,
    /// Stops resolved from a loosened query
    pub approximate: Vec<StopId>,
}

/// Resolve every row and number the resolved stops 1, 2, 3, ...
///
/// Rows without street or house number are skipped; rows the geocoder
/// cannot place are reported, never fatal.
pub async fn resolve_stops<G: Geocoder>(rows: &[AddressRow], geocoder: &G) -> ImportReport {
    let mut report = ImportReport::default();

    for (row_index, row) in rows.iter().enumerate() {
        if row.address.street.is_empty() || row.address.house_number.is_empty() {
            report.unresolved.push(UnresolvedRow {
                row: row_index,
                address: row.address.clone(),
                reason: "missing street or house number",
            });
            continue;
        }

        let Some(hit) = geocoder.resolve(&row.address).await else {
            report.unresolved.push(UnresolvedRow {
                row: row_index,
                address: row.address.clone(),
                reason: "no geocoding result",
            });
            continue;
        };

        if !hit.point.is_valid() {
            report.unresolved.push(UnresolvedRow {
                row: row_index,
                address: row.address.clone(),
                reason: "geocoder returned invalid coordinates",
            });
            continue;
        }

        let id = report.stops.len() as StopId + 1;
        let mut stop = Stop::new(id, hit.point);
        if let Some(note) = row.note.as_deref().filter(|n| !n.trim().is_empty()) {
            stop = stop.with_note(note);
        }
        if hit.approximate {
            report.approximate.push(id);
        }
        report.stops.push(stop);
    }

    log::info!(
        "resolved {} of {} addresses ({} approximate)",
        report.stops.len(),
        rows.len(),
        report.approximate.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls through to a static table
    struct CountingGeocoder {
        inner: StaticGeocoder,
        calls: AtomicUsize,
    }

    impl Geocoder for CountingGeocoder {
        async fn resolve(&self, query: &AddressQuery) -> Option<GeocodeHit> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(query).await
        }
    }

    fn row(street: &str, house: &str, city: &str, note: Option<&str>) -> AddressRow {
        AddressRow {
            address: AddressQuery::new(street, house, city),
            note: note.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_house_number_suffixes() {
        let q = AddressQuery::parse("Hauptstraße 9a, Homburg");
        assert_eq!(q, AddressQuery::new("Hauptstraße", "9a", "Homburg"));

        let q = AddressQuery::parse("Am Markt 12/3, Zweibrücken");
        assert_eq!(q.street, "Am Markt");
        assert_eq!(q.house_number, "12/3");

        let q = AddressQuery::parse("Lange Gasse 4-6");
        assert_eq!(q.house_number, "4-6");
        assert_eq!(q.city, "");
    }

    #[test]
    fn test_parse_without_numeric_token() {
        let q = AddressQuery::parse("Am Bahnhof Nord, Town");
        assert_eq!(q.street, "Am Bahnhof");
        assert_eq!(q.house_number, "Nord");

        let q = AddressQuery::parse("Marktplatz");
        assert_eq!(q.street, "");
        assert_eq!(q.house_number, "Marktplatz");
    }

    #[test]
    fn test_attempt_forms() {
        let q = AddressQuery::new("Hauptstraße", "9a", "Homburg");
        assert_eq!(q.numeric_house_number(), Some("9"));
        assert_eq!(
            q.for_attempt(QueryForm::NumericHouseNumber).unwrap().house_number,
            "9"
        );
        assert_eq!(q.for_attempt(QueryForm::StreetOnly).unwrap().house_number, "");

        // Plain numbers have no distinct numeric form
        let plain = AddressQuery::new("Hauptstraße", "9", "Homburg");
        assert_eq!(plain.for_attempt(QueryForm::NumericHouseNumber), None);
        assert_eq!(q.cache_key(), "Hauptstraße|9a|Homburg");
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_looser_forms() {
        let mut table = StaticGeocoder::new();
        table.insert(&AddressQuery::new("Hauptstraße", "9", "Homburg"), GeoPoint::new(49.32, 7.33));
        let chain = ResolverChain::with_default_attempts(table);

        let hit = chain
            .resolve(&AddressQuery::new("Hauptstraße", "9a", "Homburg"))
            .await
            .unwrap();
        assert_eq!(hit.point, GeoPoint::new(49.32, 7.33));
        assert!(hit.approximate);

        let exact = chain
            .resolve(&AddressQuery::new("Hauptstraße", "9", "Homburg"))
            .await
            .unwrap();
        assert!(!exact.approximate);

        assert!(chain
            .resolve(&AddressQuery::new("Nowhere", "1", "Void"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_cache_reuses_hits() {
        let mut table = StaticGeocoder::new();
        let query = AddressQuery::new("Ringstraße", "2", "Town");
        table.insert(&query, GeoPoint::new(49.0, 7.0));
        let cached = CachedGeocoder::new(CountingGeocoder {
            inner: table,
            calls: AtomicUsize::new(0),
        });

        assert!(cached.resolve(&query).await.is_some());
        assert!(cached.resolve(&query).await.is_some());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.cached_count(), 1);

        let missing = AddressQuery::new("Gone", "1", "Town");
        assert!(cached.resolve(&missing).await.is_none());
        assert!(cached.resolve(&missing).await.is_none());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_resolve_stops_numbers_sequentially() {
        let mut table = StaticGeocoder::new();
        table.insert(&AddressQuery::new("A-Weg", "1", "T"), GeoPoint::new(49.50, 7.00));
        table.insert(&AddressQuery::new("C-Weg", "3", "T"), GeoPoint::new(49.52, 7.02));
        let rows = vec![
            row("A-Weg", "1", "T", Some("Hintereingang")),
            row("B-Weg", "2", "T", None),
            row("", "5", "T", None),
            row("C-Weg", "3", "T", Some("  ")),
        ];

        let report = resolve_stops(&rows, &table).await;
        let ids: Vec<_> = report.stops.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(report.stops[0].has_annotation);
        assert_eq!(report.stops[0].note.as_deref(), Some("Hintereingang"));
        assert!(!report.stops[1].has_annotation);

        let unresolved: Vec<_> = report.unresolved.iter().map(|u| u.row).collect();
        assert_eq!(unresolved, vec![1, 2]);
        assert_eq!(report.unresolved[0].reason, "no geocoding result");
        assert!(report.approximate.is_empty());
    }

    #[test]
    fn test_row_deserializes_flat() {
        let row: AddressRow = serde_json::from_str(
            r#"{"street": "Hauptstraße", "house_number": "9a", "city": "Homburg", "note": "bell broken"}"#,
        )
        .unwrap();
        assert_eq!(row.address.house_number, "9a");
        assert_eq!(row.note.as_deref(), Some("bell broken"));
    }
}
