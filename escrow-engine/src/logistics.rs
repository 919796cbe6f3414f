//! Logistics matching - pairs a shipment with travelers flying the route

use crate::{error::EscrowError, EscrowResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A traveler offering luggage space on a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelerRoute {
    pub traveler_id: String,
    pub origin: String,
    pub destination: String,
    pub departure: NaiveDate,
    pub capacity_kg: f64,
}

/// Shipment to be carried
#[derive(Debug, Clone, Deserialize)]
pub struct ShipmentRequest {
    pub origin: String,
    pub destination: String,
    pub weight_kg: f64,
    #[serde(default)]
    pub deliver_by: Option<NaiveDate>,
}

/// Ranked candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TravelerMatch {
    #[serde(flatten)]
    pub route: TravelerRoute,
    pub spare_capacity_kg: f64,
}

/// Registered traveler routes
pub struct LogisticsMatcher {
    routes: RwLock<Vec<TravelerRoute>>,
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl LogisticsMatcher {
    pub fn new(routes: Vec<TravelerRoute>) -> Self {
        Self {
            routes: RwLock::new(routes),
        }
    }

    pub async fn register(&self, mut route: TravelerRoute) -> EscrowResult<()> {
        if route.capacity_kg <= 0.0 {
            return Err(EscrowError::validation("capacity_kg must be greater than 0"));
        }
        route.origin = normalize_code(&route.origin);
        route.destination = normalize_code(&route.destination);
        self.routes.write().await.push(route);
        Ok(())
    }

    /// Routes that can carry the shipment, earliest departure first, then most spare room
    pub async fn match_travelers(&self, shipment: &ShipmentRequest) -> EscrowResult<Vec<TravelerMatch>> {
        if shipment.weight_kg <= 0.0 || !shipment.weight_kg.is_finite() {
            return Err(EscrowError::validation("weight_kg must be greater than 0"));
        }
        let origin = normalize_code(&shipment.origin);
        let destination = normalize_code(&shipment.destination);
        if origin.is_empty() || destination.is_empty() {
            return Err(EscrowError::validation("origin and destination are required"));
        }

        let routes = self.routes.read().await;
        let mut matches: Vec<TravelerMatch> = routes
            .iter()
            .filter(|r| r.origin == origin && r.destination == destination)
            .filter(|r| r.capacity_kg >= shipment.weight_kg)
            .filter(|r| shipment.deliver_by.map_or(true, |by| r.departure <= by))
            .map(|r| TravelerMatch {
                route: r.clone(),
                spare_capacity_kg: r.capacity_kg - shipment.weight_kg,
            })
            .collect();

        matches.sort_by(|a, b| {
            a.route
                .departure
                .cmp(&b.route.departure)
                .then(b.spare_capacity_kg.total_cmp(&a.spare_capacity_kg))
        });

        Ok(matches)
    }
}

impl Default for LogisticsMatcher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, day: u32, capacity_kg: f64) -> TravelerRoute {
        TravelerRoute {
            traveler_id: id.to_string(),
            origin: "lim".to_string(),
            destination: "jfk".to_string(),
            departure: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
            capacity_kg,
        }
    }

    #[tokio::test]
    async fn test_match_ranks_by_departure_then_capacity() {
        let matcher = LogisticsMatcher::default();
        matcher.register(route("late", 20, 10.0)).await.unwrap();
        matcher.register(route("small", 5, 5.0)).await.unwrap();
        matcher.register(route("big", 5, 20.0)).await.unwrap();
        matcher.register(route("tiny", 1, 1.0)).await.unwrap();

        let matches = matcher
            .match_travelers(&ShipmentRequest {
                origin: "LIM".to_string(),
                destination: "JFK".to_string(),
                weight_kg: 4.0,
                deliver_by: NaiveDate::from_ymd_opt(2026, 3, 10),
            })
            .await
            .unwrap();

        let ids: Vec<&str> = matches.iter().map(|m| m.route.traveler_id.as_str()).collect();
        assert_eq!(ids, vec!["big", "small"]);
        assert_eq!(matches[0].spare_capacity_kg, 16.0);
    }

    #[tokio::test]
    async fn test_rejects_non_positive_weight() {
        let matcher = LogisticsMatcher::default();
        let result = matcher
            .match_travelers(&ShipmentRequest {
                origin: "LIM".to_string(),
                destination: "JFK".to_string(),
                weight_kg: 0.0,
                deliver_by: None,
            })
            .await;
        assert!(matches!(result, Err(EscrowError::Validation(_))));
    }
}
