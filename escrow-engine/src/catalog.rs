//! Product catalog used by the commerce lookup methods

use crate::{error::EscrowError, EscrowResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default and maximum page sizes for a search
pub const DEFAULT_SEARCH_LIMIT: usize = 20;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Marketplace listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub title: String,
    pub category: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub currency: String,
    pub seller_id: String,
    pub location: String,
}

/// Search parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub max_price: Option<Decimal>,
    #[serde(default)]
    pub limit: Option<usize>,
}

pub struct ProductCatalog {
    products: Vec<Product>,
}

impl ProductCatalog {
    pub fn new(products: Vec<Product>) -> Self {
        Self { products }
    }

    /// Catalog preloaded with the marketplace's starter listings
    pub fn seeded() -> Self {
        let listing = |id: &str, title: &str, category: &str, cents: i64, seller: &str, location: &str| Product {
            id: id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            price: Decimal::new(cents, 2),
            currency: "USD".to_string(),
            seller_id: seller.to_string(),
            location: location.to_string(),
        };

        Self::new(vec![
            listing("1", "Handwoven Alpaca Scarf", "fashion", 10000, "seller-lima", "LIM"),
            listing("2", "Single-Origin Coffee Beans 1kg", "food", 2850, "seller-bogota", "BOG"),
            listing("3", "Vintage Film Camera", "electronics", 18900, "seller-tokyo", "NRT"),
            listing("4", "Ceramic Tea Set", "home", 6400, "seller-kyoto", "KIX"),
            listing("5", "Leather Travel Journal", "stationery", 3500, "seller-florence", "FLR"),
            listing("6", "Wireless Noise-Cancelling Headphones", "electronics", 24999, "seller-seoul", "ICN"),
            listing("7", "Moroccan Argan Oil", "beauty", 1999, "seller-marrakech", "RAK"),
            listing("8", "Merino Wool Hiking Socks", "fashion", 2400, "seller-auckland", "AKL"),
        ])
    }

    pub fn get(&self, id: &str) -> EscrowResult<&Product> {
        self.products
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| EscrowError::not_found(format!("Product {} not found", id)))
    }

    /// Case-insensitive substring search on title and category
    pub fn search(&self, query: &ProductQuery) -> Vec<Product> {
        let needle = query.query.as_deref().map(str::to_lowercase);
        let category = query.category.as_deref().map(str::to_lowercase);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT);

        self.products
            .iter()
            .filter(|p| match &needle {
                Some(n) => {
                    p.title.to_lowercase().contains(n) || p.category.to_lowercase().contains(n)
                }
                None => true,
            })
            .filter(|p| category.as_ref().map_or(true, |c| p.category.to_lowercase() == *c))
            .filter(|p| query.max_price.map_or(true, |max| p.price <= max))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::seeded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_search_by_text_and_price() {
        let catalog = ProductCatalog::seeded();

        let electronics = catalog.search(&ProductQuery {
            query: Some("ELECTRONICS".to_string()),
            ..Default::default()
        });
        assert_eq!(electronics.len(), 2);

        let cheap = catalog.search(&ProductQuery {
            category: Some("electronics".to_string()),
            max_price: Some(dec!(200)),
            ..Default::default()
        });
        assert_eq!(cheap.len(), 1);
        assert_eq!(cheap[0].id, "3");
    }

    #[test]
    fn test_get_unknown_product() {
        let catalog = ProductCatalog::seeded();
        assert_eq!(catalog.get("1").unwrap().price, dec!(100));
        assert!(matches!(catalog.get("missing"), Err(EscrowError::NotFound(_))));
    }

    #[test]
    fn test_limit_is_applied() {
        let catalog = ProductCatalog::seeded();
        let page = catalog.search(&ProductQuery {
            limit: Some(3),
            ..Default::default()
        });
        assert_eq!(page.len(), 3);
    }
}
