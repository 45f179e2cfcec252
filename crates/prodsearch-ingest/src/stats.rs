//! Catalog statistics.

use std::collections::BTreeMap;

use serde::Serialize;

use prodsearch_core::Product;

/// Price distribution of a catalog; all `None` when it is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceStatistics {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

/// Product counts and price distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogStatistics {
    pub total_products: usize,
    pub categories: BTreeMap<String, usize>,
    pub price: PriceStatistics,
}

impl CatalogStatistics {
    pub fn from_products(products: &[Product]) -> Self {
        let mut categories = BTreeMap::new();
        for p in products {
            *categories.entry(p.category.clone()).or_insert(0) += 1;
        }

        let mut prices: Vec<f64> = products.iter().map(|p| p.price).collect();
        prices.sort_by(|a, b| a.total_cmp(b));

        let price = if prices.is_empty() {
            PriceStatistics::default()
        } else {
            let n = prices.len();
            let median = if n % 2 == 1 {
                prices[n / 2]
            } else {
                (prices[n / 2 - 1] + prices[n / 2]) / 2.0
            };
            PriceStatistics {
                min: prices.first().copied(),
                max: prices.last().copied(),
                mean: Some(prices.iter().sum::<f64>() / n as f64),
                median: Some(median),
            }
        };

        Self {
            total_products: products.len(),
            categories,
            price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: i64, category: &str, price: f64) -> Product {
        Product {
            id,
            category: category.to_string(),
            title: format!("Item {}", id),
            description: String::new(),
            price,
            url: format!("https://shop.example.com/p/{}", id),
        }
    }

    #[test]
    fn test_statistics() {
        let stats = CatalogStatistics::from_products(&[
            product(1, "Home", 10.0),
            product(2, "Home", 40.0),
            product(3, "Garden", 20.0),
            product(4, "Office", 30.0),
        ]);

        assert_eq!(stats.total_products, 4);
        assert_eq!(stats.categories["Home"], 2);
        assert_eq!(stats.price.min, Some(10.0));
        assert_eq!(stats.price.max, Some(40.0));
        assert_eq!(stats.price.mean, Some(25.0));
        assert_eq!(stats.price.median, Some(25.0));
    }

    #[test]
    fn test_empty_statistics() {
        let stats = CatalogStatistics::from_products(&[]);
        assert_eq!(stats.total_products, 0);
        assert_eq!(stats.price, PriceStatistics::default());
    }
}
