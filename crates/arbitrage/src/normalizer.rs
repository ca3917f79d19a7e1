//! Market normalization: venue-native identifiers to canonical [`GameKey`]s.
//!
//! Both venues describe the same game with different strings:
//!
//! ```text
//! Polymarket slug:  nfl-buf-den-2026-01-17
//! Kalshi ticker:    KXNFLGAME-26JAN17BUFDEN   (side ticker ...-BUF)
//! ```
//!
//! Normalization is pure string structure — no network calls, no fuzzy
//! matching. An identifier that does not decompose into the expected token
//! pattern for its venue returns [`NormalizeError::NotRecognized`] and the
//! game is skipped. A wrong pairing would break the complementary-outcome
//! invariant the whole strategy depends on, so the normalizer never guesses:
//! unknown-but-well-formed team codes pass through verbatim (an exact match
//! on both venues still pairs correctly), while anything structurally
//! ambiguous is refused.

use sportsarb_core::types::{GameKey, MarketType, Side, Sport, VenueId};

use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

// =============================================================================
// Errors
// =============================================================================

/// Normalization failure. Always non-fatal: the caller skips the game.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The identifier does not decompose into the venue's token pattern.
    #[error("unrecognized {venue} identifier '{native_id}': {reason}")]
    NotRecognized {
        venue: VenueId,
        native_id: String,
        reason: String,
    },
}

impl NormalizeError {
    fn not_recognized(venue: VenueId, native_id: &str, reason: impl Into<String>) -> Self {
        Self::NotRecognized {
            venue,
            native_id: native_id.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Alias table
// =============================================================================

/// Folds venue-specific team code variants into one canonical short code.
///
/// Keyed per sport because codes collide across leagues (`no` is the Saints
/// in the NFL and New Orleans in the NBA uses `nop`). Data, not code: rows
/// can be extended at construction time without touching parsing logic.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<(Sport, String), String>,
}

impl AliasTable {
    /// Empty table; every code passes through verbatim.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The builtin variant set observed across the two venues' listings.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::default();
        let nfl: &[(&str, &str)] = &[
            ("was", "wsh"),
            ("jac", "jax"),
            ("gnb", "gb"),
            ("kan", "kc"),
            ("lvr", "lv"),
            ("nwe", "ne"),
            ("nor", "no"),
            ("sfo", "sf"),
            ("tam", "tb"),
        ];
        let nba: &[(&str, &str)] = &[
            ("gs", "gsw"),
            ("ny", "nyk"),
            ("sa", "sas"),
            ("no", "nop"),
            ("utah", "uta"),
            ("pho", "phx"),
        ];
        for (alias, canonical) in nfl {
            table.insert(Sport::Nfl, alias, canonical);
        }
        for (alias, canonical) in nba {
            table.insert(Sport::Nba, alias, canonical);
        }
        table
    }

    /// Adds one alias row.
    pub fn insert(&mut self, sport: Sport, alias: &str, canonical: &str) {
        self.aliases
            .insert((sport, alias.to_lowercase()), canonical.to_lowercase());
    }

    /// Canonical code for `raw`, folding known variants; unknown codes pass
    /// through lowercased.
    #[must_use]
    pub fn canonicalize(&self, sport: Sport, raw: &str) -> String {
        let lowered = raw.to_lowercase();
        self.aliases
            .get(&(sport, lowered.clone()))
            .cloned()
            .unwrap_or(lowered)
    }
}

// =============================================================================
// Normalized output
// =============================================================================

/// A recognized market: the canonical key, plus which side the native
/// identifier addressed when it named a specific outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMarket {
    pub game_key: GameKey,
    /// `Some` when the identifier selects one outcome (Kalshi side tickers,
    /// participant-directional suffixes); `None` for market-level ids.
    pub side: Option<Side>,
}

// =============================================================================
// Normalizer
// =============================================================================

/// Pure string-structure normalizer for both venues' identifiers.
#[derive(Debug, Clone)]
pub struct MarketNormalizer {
    aliases: AliasTable,
}

impl Default for MarketNormalizer {
    fn default() -> Self {
        Self::new(AliasTable::builtin())
    }
}

impl MarketNormalizer {
    #[must_use]
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    /// Normalizes a venue-native identifier.
    ///
    /// # Errors
    ///
    /// [`NormalizeError::NotRecognized`] when the identifier does not match
    /// the venue's token grammar. Never guesses on ambiguity.
    pub fn normalize(
        &self,
        venue: VenueId,
        native_id: &str,
    ) -> Result<NormalizedMarket, NormalizeError> {
        let result = match venue {
            VenueId::Polymarket => self.normalize_slug(native_id),
            VenueId::Kalshi => self.normalize_ticker(native_id),
        };
        if let Ok(market) = &result {
            debug!(venue = %venue, native_id, game_key = %market.game_key, "normalized market");
        }
        result
    }

    // ---------------------------------------------------------------------
    // Polymarket slugs
    // ---------------------------------------------------------------------

    /// Grammar: `<sport>-<teamA>-<teamB>-<yyyy>-<mm>-<dd>[-spread-<team>-<line>|-total-<line>]`
    /// where `<line>` uses `-` for the decimal point (`3-5` is 3.5).
    fn normalize_slug(&self, slug: &str) -> Result<NormalizedMarket, NormalizeError> {
        let venue = VenueId::Polymarket;
        let parts: Vec<&str> = slug.split('-').collect();
        if parts.len() < 6 {
            return Err(NormalizeError::not_recognized(
                venue,
                slug,
                "expected at least sport-teamA-teamB-yyyy-mm-dd",
            ));
        }

        let sport = Sport::from_token(parts[0]).ok_or_else(|| {
            NormalizeError::not_recognized(venue, slug, format!("unknown sport '{}'", parts[0]))
        })?;
        let team_a = self.team_code(sport, parts[1], venue, slug)?;
        let team_b = self.team_code(sport, parts[2], venue, slug)?;

        if !is_date_triplet(parts[3], parts[4], parts[5]) {
            return Err(NormalizeError::not_recognized(
                venue,
                slug,
                "expected yyyy-mm-dd date after team codes",
            ));
        }

        let rest = &parts[6..];
        let (market, side) = match rest {
            [] => (MarketType::Moneyline, None),
            ["total", whole, frac] => {
                let line = parse_slug_line(whole, frac)
                    .ok_or_else(|| NormalizeError::not_recognized(venue, slug, "bad total line"))?;
                (MarketType::Total { line }, None)
            }
            ["spread", team, whole, frac] => {
                let line = parse_slug_line(whole, frac).ok_or_else(|| {
                    NormalizeError::not_recognized(venue, slug, "bad spread line")
                })?;
                let code = self.team_code(sport, team, venue, slug)?;
                return self.spread_market(venue, slug, sport, &team_a, &team_b, &code, line);
            }
            _ => {
                return Err(NormalizeError::not_recognized(
                    venue,
                    slug,
                    "unrecognized market suffix",
                ))
            }
        };

        Ok(NormalizedMarket {
            game_key: GameKey::new(sport, team_a, team_b, market),
            side,
        })
    }

    // ---------------------------------------------------------------------
    // Kalshi tickers
    // ---------------------------------------------------------------------

    /// Grammar: `KX<SPORT><KIND>-<yymonDD><TEAMS>[-<SIDE>]` where `KIND` is
    /// `GAME`, `SPREAD`, or `TOTAL`; `<TEAMS>` is two concatenated codes
    /// split by total length (6→3+3, 5→3+2, 7→4+3, 8→4+4); `<SIDE>` is a
    /// team code, `<team><line>` for spreads, or `O<line>`/`U<line>` for
    /// totals, with `P5` marking the half point.
    fn normalize_ticker(&self, ticker: &str) -> Result<NormalizedMarket, NormalizeError> {
        let venue = VenueId::Kalshi;
        let mut segments = ticker.split('-');
        let series = segments.next().unwrap_or_default();
        let event = segments.next().ok_or_else(|| {
            NormalizeError::not_recognized(venue, ticker, "missing event segment")
        })?;
        let side_segment = segments.next();
        if segments.next().is_some() {
            return Err(NormalizeError::not_recognized(
                venue,
                ticker,
                "too many segments",
            ));
        }

        let (sport, kind) = parse_series(series).ok_or_else(|| {
            NormalizeError::not_recognized(venue, ticker, format!("unknown series '{series}'"))
        })?;

        let team_block = strip_event_date(event).ok_or_else(|| {
            NormalizeError::not_recognized(venue, ticker, "event segment missing date prefix")
        })?;
        let (raw_a, raw_b) = split_team_block(team_block).ok_or_else(|| {
            NormalizeError::not_recognized(
                venue,
                ticker,
                format!("cannot split team block '{team_block}'"),
            )
        })?;
        let team_a = self.aliases.canonicalize(sport, raw_a);
        let team_b = self.aliases.canonicalize(sport, raw_b);

        match kind {
            SeriesKind::Game => {
                let key = GameKey::new(sport, team_a.clone(), team_b.clone(), MarketType::Moneyline);
                let side = match side_segment {
                    None => None,
                    Some(raw) => {
                        let code = self.aliases.canonicalize(sport, raw);
                        Some(key.side_for(&code).ok_or_else(|| {
                            NormalizeError::not_recognized(
                                venue,
                                ticker,
                                format!("side team '{raw}' is not a participant"),
                            )
                        })?)
                    }
                };
                Ok(NormalizedMarket {
                    game_key: key,
                    side,
                })
            }
            SeriesKind::Spread => {
                let segment = side_segment.ok_or_else(|| {
                    NormalizeError::not_recognized(venue, ticker, "spread ticker missing team+line")
                })?;
                let (raw_team, line) = parse_ticker_team_line(segment).ok_or_else(|| {
                    NormalizeError::not_recognized(venue, ticker, "bad spread segment")
                })?;
                let code = self.aliases.canonicalize(sport, raw_team);
                self.spread_market(venue, ticker, sport, &team_a, &team_b, &code, line)
            }
            SeriesKind::Total => {
                let segment = side_segment.filter(|s| !s.is_empty()).ok_or_else(|| {
                    NormalizeError::not_recognized(venue, ticker, "total ticker missing line")
                })?;
                let (side, digits) = if let Some(rest) = segment.strip_prefix('O') {
                    (Side::Yes, rest)
                } else if let Some(rest) = segment.strip_prefix('U') {
                    (Side::No, rest)
                } else {
                    return Err(NormalizeError::not_recognized(
                        venue,
                        ticker,
                        "total side must be O or U",
                    ));
                };
                let line = parse_ticker_line(digits).ok_or_else(|| {
                    NormalizeError::not_recognized(venue, ticker, "bad total line")
                })?;
                require_half_point(line)
                    .map_err(|reason| NormalizeError::not_recognized(venue, ticker, reason))?;
                Ok(NormalizedMarket {
                    game_key: GameKey::new(sport, team_a, team_b, MarketType::Total { line }),
                    side: Some(side),
                })
            }
        }
    }

    // ---------------------------------------------------------------------
    // Shared pieces
    // ---------------------------------------------------------------------

    /// Builds a spread market for the team named by the identifier.
    ///
    /// The key's line is always expressed as participant A's handicap, so
    /// both venues land on the same key. A line naming participant B flips
    /// sign and maps to [`Side::No`]. Whole-number lines are refused: a push
    /// outcome means "B covers" is no longer the exact complement of
    /// "A covers", and the hedge payout is no longer fixed.
    #[allow(clippy::too_many_arguments)]
    fn spread_market(
        &self,
        venue: VenueId,
        native_id: &str,
        sport: Sport,
        team_a: &str,
        team_b: &str,
        named_team: &str,
        line: Decimal,
    ) -> Result<NormalizedMarket, NormalizeError> {
        require_half_point(line)
            .map_err(|reason| NormalizeError::not_recognized(venue, native_id, reason))?;
        let key_moneyline = GameKey::new(sport, team_a, team_b, MarketType::Moneyline);
        let (key_line, side) = if named_team == key_moneyline.participant_a {
            (line, Side::Yes)
        } else if named_team == key_moneyline.participant_b {
            (-line, Side::No)
        } else {
            return Err(NormalizeError::not_recognized(
                venue,
                native_id,
                format!("spread team '{named_team}' is not a participant"),
            ));
        };
        Ok(NormalizedMarket {
            game_key: GameKey::new(sport, team_a, team_b, MarketType::Spread { line: key_line }),
            side: Some(side),
        })
    }

    fn team_code(
        &self,
        sport: Sport,
        raw: &str,
        venue: VenueId,
        native_id: &str,
    ) -> Result<String, NormalizeError> {
        if raw.len() < 2 || raw.len() > 4 || !raw.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(NormalizeError::not_recognized(
                venue,
                native_id,
                format!("'{raw}' is not a team code"),
            ));
        }
        Ok(self.aliases.canonicalize(sport, raw))
    }
}

// =============================================================================
// Token helpers
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum SeriesKind {
    Game,
    Spread,
    Total,
}

/// `KXNFLGAME` → (Nfl, Game). The `KX` prefix is optional on older series.
fn parse_series(series: &str) -> Option<(Sport, SeriesKind)> {
    let body = series.strip_prefix("KX").unwrap_or(series);
    for (suffix, kind) in [
        ("GAME", SeriesKind::Game),
        ("SPREAD", SeriesKind::Spread),
        ("TOTAL", SeriesKind::Total),
    ] {
        if let Some(sport_token) = body.strip_suffix(suffix) {
            return Sport::from_token(&sport_token.to_lowercase()).map(|sport| (sport, kind));
        }
    }
    None
}

/// Strips the leading `yyMONdd` date from an event segment, returning the
/// trailing team block. `26JAN17BUFDEN` → `BUFDEN`.
fn strip_event_date(event: &str) -> Option<&str> {
    let bytes = event.as_bytes();
    if bytes.len() < 7 {
        return None;
    }
    let digits_ok = bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[5].is_ascii_digit()
        && bytes[6].is_ascii_digit();
    let month_ok = bytes[2..5].iter().all(u8::is_ascii_uppercase);
    if digits_ok && month_ok {
        Some(&event[7..])
    } else {
        None
    }
}

/// Splits a concatenated two-team block by its only unambiguous signal, the
/// total length. Anything outside the known length patterns is refused.
fn split_team_block(block: &str) -> Option<(&str, &str)> {
    if !block.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let split_at = match block.len() {
        5 => 3, // BUFGB
        6 => 3, // BUFDEN
        7 => 4, // CONNDUK
        8 => 4, // CONNGONZ
        _ => return None,
    };
    Some(block.split_at(split_at))
}

/// `BUF3P5` → ("BUF", 3.5). Letters then digits with an optional `P5` half.
fn parse_ticker_team_line(segment: &str) -> Option<(&str, Decimal)> {
    let digit_start = segment.find(|c: char| c.is_ascii_digit())?;
    let (team, digits) = segment.split_at(digit_start);
    if team.is_empty() {
        return None;
    }
    Some((team, parse_ticker_line(digits)?))
}

/// `224P5` → 224.5; `224` → 224.
fn parse_ticker_line(digits: &str) -> Option<Decimal> {
    let (whole, half) = match digits.split_once('P') {
        Some((whole, "5")) => (whole, true),
        Some(_) => return None,
        None => (digits, false),
    };
    let whole: Decimal = whole.parse().ok()?;
    Some(if half {
        whole + Decimal::new(5, 1)
    } else {
        whole
    })
}

/// Slug lines spell the decimal point with a dash: `("3", "5")` → 3.5.
fn parse_slug_line(whole: &str, frac: &str) -> Option<Decimal> {
    if whole.is_empty() || frac.is_empty() {
        return None;
    }
    format!("{whole}.{frac}").parse().ok()
}

fn require_half_point(line: Decimal) -> Result<(), String> {
    if (line * Decimal::TWO).fract().is_zero() && !line.fract().is_zero() {
        Ok(())
    } else {
        Err(format!("line {line} is not a half point (push risk)"))
    }
}

fn is_date_triplet(yyyy: &str, mm: &str, dd: &str) -> bool {
    yyyy.len() == 4
        && mm.len() == 2
        && dd.len() == 2
        && [yyyy, mm, dd]
            .iter()
            .all(|part| part.chars().all(|c| c.is_ascii_digit()))
}

// =============================================================================
// Tests
// =============================================================================
