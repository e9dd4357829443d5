//! Texts assembled from product fields during enrichment.

use crate::catalog::text::{join_non_empty, shorten_measure};
use crate::catalog::Product;

const MAX_TOPICS: usize = 6;
const MAX_ATTRIBUTES: usize = 8;
const MAX_KEYWORDS: usize = 16;

/// Labelled product description handed to the extractor.
pub fn build_product_text(product: &Product) -> String {
    let labelled = |label: &str, value: &str| {
        let value = value.trim();
        if value.is_empty() {
            String::new()
        } else {
            format!("{}: {}", label, value)
        }
    };
    let format = shorten_measure(&product.format);

    let mut parts = vec![
        product.title.trim().to_string(),
        labelled("Brand", &product.brand),
        labelled("Category", &product.category),
        labelled("Themes", &product.themes),
        labelled("Material", &product.material),
        labelled("Secondary material", &product.material_secondary),
        labelled("Format", &format),
        labelled("Binding", &product.binding),
        labelled("Made in", &product.made_in),
        product.description.trim().to_string(),
    ];

    if let Some(dims) = &product.dimensions {
        let dim_parts: Vec<String> = [
            ("width", &dims.width),
            ("height", &dims.height),
            ("depth", &dims.depth),
            ("weight_g", &dims.weight_g),
        ]
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| format!("{}={}", k, v.trim()))
        .collect();
        if !dim_parts.is_empty() {
            parts.push(format!("Dimensions: {}", dim_parts.join(", ")));
        }
    }

    join_non_empty(parts.iter().map(String::as_str))
}

/// Text the candidate keywords are compared against.
pub fn rescore_base_text(product: &Product) -> String {
    let format = shorten_measure(&product.format);
    join_non_empty([
        product.title.trim(),
        product.brand.trim(),
        product.category.trim(),
        product.themes.trim(),
        format.trim(),
        product.binding.trim(),
        product.material.trim(),
        product.description.trim(),
    ])
}

/// Summary followed by the leading topics, attributes and keywords.
pub fn canonical_text(summary: &str, keywords: &[String], topics: &[String], attributes: &[String]) -> String {
    let section = |label: &str, items: &[String], max: usize| {
        if items.is_empty() {
            String::new()
        } else {
            let shown: Vec<&str> = items.iter().take(max).map(String::as_str).collect();
            format!("{}: {}", label, shown.join(", "))
        }
    };

    let topics = section("Topics", topics, MAX_TOPICS);
    let attributes = section("Attributes", attributes, MAX_ATTRIBUTES);
    let keywords = section("Keywords", keywords, MAX_KEYWORDS);
    join_non_empty([summary.trim(), &topics, &attributes, &keywords])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Dimensions;

    fn notebook() -> Product {
        Product {
            title: "Taccuino Gatti".to_string(),
            brand: "Legami".to_string(),
            category: "Notebooks".to_string(),
            format: "10x15".to_string(),
            binding: "Rilegato".to_string(),
            made_in: "China".to_string(),
            description: "Un taccuino con gatti.".to_string(),
            dimensions: Some(Dimensions {
                width: "10".to_string(),
                height: "15".to_string(),
                ..Dimensions::default()
            }),
            ..Product::default()
        }
    }

    #[test]
    fn test_product_text() {
        assert_eq!(
            build_product_text(&notebook()),
            "Taccuino Gatti. Brand: Legami. Category: Notebooks. Format: 10 x 15 cm. \
             Binding: Rilegato. Made in: China. Un taccuino con gatti.. \
             Dimensions: width=10, height=15"
        );
    }

    #[test]
    fn test_rescore_base_text() {
        assert_eq!(
            rescore_base_text(&notebook()),
            "Taccuino Gatti. Legami. Notebooks. 10 x 15 cm. Rilegato. Un taccuino con gatti."
        );
        assert_eq!(rescore_base_text(&Product::default()), "");
    }

    #[test]
    fn test_canonical_text_limits() {
        let kws: Vec<String> = (0..20).map(|i| format!("k{}", i)).collect();
        let topics = vec!["cats".to_string()];
        let text = canonical_text("A notebook with cats.", &kws, &topics, &[]);
        assert!(text.starts_with("A notebook with cats.. Topics: cats. Keywords: k0, k1"));
        assert!(text.ends_with("k15"));
        assert!(!text.contains("Attributes"));

        assert_eq!(canonical_text("", &[], &[], &[]), "");
    }
}
