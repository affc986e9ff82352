/// Ranking is computed outside the engine or by a pluggable scorer; the
/// engine only stores the score and orders by it (descending, nulls last).
pub trait OfferScorer: Send + Sync {
    fn score(&self, offer_data: &serde_json::Value) -> Option<f64>;
}

/// Leaves ranking entirely to the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoScorer;

impl OfferScorer for NoScorer {
    fn score(&self, _offer_data: &serde_json::Value) -> Option<f64> {
        None
    }
}

/// Scores offers that carry an integer `price` field: cheaper offers rank
/// higher. Offers without a usable price stay unscored and sort last.
#[derive(Clone, Copy, Debug, Default)]
pub struct PriceScorer;

impl OfferScorer for PriceScorer {
    fn score(&self, offer_data: &serde_json::Value) -> Option<f64> {
        let price = offer_data.get("price")?.as_i64()?;
        if price < 0 {
            return None;
        }
        Some(-(price as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::{NoScorer, OfferScorer, PriceScorer};

    #[test]
    fn no_scorer_never_scores() {
        assert_eq!(NoScorer.score(&serde_json::json!({"price": 100})), None);
    }

    #[test]
    fn cheaper_offers_rank_higher() {
        let cheap = PriceScorer.score(&serde_json::json!({"price": 300})).expect("scored");
        let costly = PriceScorer.score(&serde_json::json!({"price": 800})).expect("scored");

        assert!(cheap > costly);
    }

    #[test]
    fn offers_without_a_price_stay_unscored() {
        assert_eq!(PriceScorer.score(&serde_json::json!({"eta_minutes": 15})), None);
        assert_eq!(PriceScorer.score(&serde_json::json!({"price": "cheap"})), None);
        assert_eq!(PriceScorer.score(&serde_json::json!({"price": -5})), None);
    }
}
