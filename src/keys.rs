//! Deterministic cache key construction and pattern matching.
//!
//! Every cached view on the platform gets its key from one of the families
//! below, so invalidating "everything about farm X" is a single pattern and
//! no caller needs to know which views exist. Keys are colon-delimited and
//! byte-identical for the same semantic parameters.

use serde_json::Value;
use std::fmt::Write as _;

/// Percent-encode the characters that would collide with key delimiters.
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '@' => out.push(ch),
            other => {
                let mut buf = [0u8; 4];
                for byte in other.encode_utf8(&mut buf).bytes() {
                    let _ = write!(out, "%{:02X}", byte);
                }
            }
        }
    }
    out
}

/// Shopping-cart views.
pub mod cart {
    pub fn items(user_id: &str) -> String {
        format!("cart:{}:items", user_id)
    }

    pub fn summary(user_id: &str) -> String {
        format!("cart:{}:summary", user_id)
    }

    pub fn count(user_id: &str) -> String {
        format!("cart:{}:count", user_id)
    }

    pub fn validation(user_id: &str) -> String {
        format!("cart:{}:validation", user_id)
    }

    pub fn item(user_id: &str, product_id: &str) -> String {
        format!("cart:{}:item:{}", user_id, product_id)
    }
}

/// Farm profiles and aggregates.
pub mod farm {
    pub fn details(farm_id: &str) -> String {
        format!("farm:{}:details", farm_id)
    }

    pub fn by_slug(slug: &str) -> String {
        format!("farm:slug:{}", slug)
    }

    pub fn list(page: u32, limit: u32) -> String {
        format!("farms:list:page:{}:limit:{}", page, limit)
    }

    pub fn by_owner(owner_id: &str) -> String {
        format!("farms:owner:{}", owner_id)
    }

    pub fn stats(farm_id: &str) -> String {
        format!("farm:{}:stats", farm_id)
    }

    pub fn products_count(farm_id: &str) -> String {
        format!("farm:{}:products:count", farm_id)
    }

    pub fn verification(farm_id: &str) -> String {
        format!("farm:{}:verification", farm_id)
    }

    pub fn seasonal(farm_id: &str, season: &str) -> String {
        format!("farm:{}:season:{}", farm_id, season)
    }
}

/// Product catalog views.
pub mod product {
    pub fn details(product_id: &str) -> String {
        format!("product:{}:details", product_id)
    }

    pub fn by_slug(slug: &str) -> String {
        format!("product:slug:{}", slug)
    }

    pub fn by_farm_and_slug(farm_slug: &str, slug: &str) -> String {
        format!("product:farm:{}:slug:{}", farm_slug, slug)
    }

    pub fn by_farm(farm_id: &str, page: u32, limit: u32) -> String {
        format!("products:farm:{}:page:{}:limit:{}", farm_id, page, limit)
    }

    pub fn search(query: &str, page: u32) -> String {
        format!("products:search:{}:page:{}", super::encode_segment(query), page)
    }

    pub fn inventory(product_id: &str) -> String {
        format!("product:{}:inventory", product_id)
    }

    pub fn related(product_id: &str, limit: u32) -> String {
        format!("product:{}:related:limit:{}", product_id, limit)
    }

    pub fn seasonal(season: &str, page: u32) -> String {
        format!("products:season:{}:page:{}", season, page)
    }

    pub fn by_category(category: &str, page: u32) -> String {
        format!("products:category:{}:page:{}", category, page)
    }
}

/// Order views and statistics.
pub mod order {
    pub fn details(order_id: &str) -> String {
        format!("order:{}:details", order_id)
    }

    pub fn by_user(user_id: &str, page: u32, limit: u32) -> String {
        format!("orders:user:{}:page:{}:limit:{}", user_id, page, limit)
    }

    pub fn by_farm(farm_id: &str, page: u32, limit: u32) -> String {
        format!("orders:farm:{}:page:{}:limit:{}", farm_id, page, limit)
    }

    pub fn user_stats(user_id: &str) -> String {
        format!("orders:user:{}:stats", user_id)
    }

    pub fn farm_stats(farm_id: &str) -> String {
        format!("orders:farm:{}:stats", farm_id)
    }

    pub fn status(order_id: &str) -> String {
        format!("order:{}:status", order_id)
    }

    pub fn recent(limit: u32) -> String {
        format!("orders:recent:limit:{}", limit)
    }

    pub fn by_date_range(farm_id: &str, from: &str, to: &str) -> String {
        format!("orders:farm:{}:range:{}:{}", farm_id, from, to)
    }
}

/// User profile views.
pub mod user {
    pub fn profile(user_id: &str) -> String {
        format!("user:{}:profile", user_id)
    }

    pub fn preferences(user_id: &str) -> String {
        format!("user:{}:preferences", user_id)
    }

    pub fn addresses(user_id: &str) -> String {
        format!("user:{}:addresses", user_id)
    }

    pub fn by_email(email: &str) -> String {
        format!("user:email:{}", email)
    }

    pub fn favorites(user_id: &str) -> String {
        format!("user:{}:favorites", user_id)
    }
}

/// Checkout session state.
pub mod checkout {
    pub fn session(session_id: &str) -> String {
        format!("checkout:session:{}", session_id)
    }

    pub fn validation(user_id: &str) -> String {
        format!("checkout:user:{}:validation", user_id)
    }

    pub fn shipping_options(user_id: &str) -> String {
        format!("checkout:shipping:{}", user_id)
    }

    pub fn payment_methods(user_id: &str) -> String {
        format!("checkout:payment:{}", user_id)
    }
}

/// Payment gateway lookups.
pub mod payment {
    pub fn intent(intent_id: &str) -> String {
        format!("payment:intent:{}", intent_id)
    }

    pub fn methods(user_id: &str) -> String {
        format!("payment:user:{}:methods", user_id)
    }

    pub fn history(user_id: &str) -> String {
        format!("payment:user:{}:history", user_id)
    }
}

/// Geocoding and proximity lookups.
pub mod location {
    pub fn geocode(address: &str) -> String {
        format!("location:geocode:{}", super::encode_segment(address))
    }

    pub fn reverse_geocode(lat: f64, lng: f64) -> String {
        format!("location:reverse:{}:{}", lat, lng)
    }

    pub fn nearby_farms(lat: f64, lng: f64, radius: u32) -> String {
        format!("location:nearby:{}:{}:radius:{}", lat, lng, radius)
    }
}

/// Seasonal and agricultural reference data.
pub mod agricultural {
    pub fn seasonal_data(season: &str) -> String {
        format!("agricultural:season:{}:data", season)
    }

    pub fn planting_calendar(year: u32) -> String {
        format!("agricultural:planting:calendar:{}", year)
    }

    pub fn harvest_schedule(farm_id: &str, season: &str) -> String {
        format!("agricultural:harvest:{}:season:{}", farm_id, season)
    }
}

/// Analytics dashboards.
pub mod analytics {
    pub fn farm_metrics(farm_id: &str, from: &str, to: &str) -> String {
        format!("analytics:farm:{}:range:{}:{}", farm_id, from, to)
    }

    pub fn product_performance(product_id: &str, period: &str) -> String {
        format!("analytics:product:{}:period:{}", product_id, period)
    }

    pub fn dashboard_summary(farm_id: &str) -> String {
        format!("analytics:dashboard:{}:summary", farm_id)
    }
}

/// HTTP response cache keys for the middleware.
pub mod http {
    /// Key for a request: method, path, and its canonically-sorted query.
    pub fn response(method: &str, path: &str, query: &[(String, String)]) -> String {
        let mut sorted: Vec<&(String, String)> = query.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

        if sorted.is_empty() {
            format!("http:{}:{}", method.to_uppercase(), path)
        } else {
            let query = sorted
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            format!("http:{}:{}?{}", method.to_uppercase(), path, query)
        }
    }
}

/// Grouped-invalidation pattern builders.
pub mod patterns {
    pub fn all_user_cart(user_id: &str) -> String {
        format!("cart:{}:*", user_id)
    }

    pub fn all_farm_data(farm_id: &str) -> String {
        format!("farm:{}:*", farm_id)
    }

    pub fn all_farm_products(farm_id: &str) -> String {
        format!("products:farm:{}:*", farm_id)
    }

    pub fn all_user_orders(user_id: &str) -> String {
        format!("orders:user:{}:*", user_id)
    }

    pub fn all_farm_orders(farm_id: &str) -> String {
        format!("orders:farm:{}:*", farm_id)
    }

    pub fn all_product_data(product_id: &str) -> String {
        format!("product:{}:*", product_id)
    }

    pub fn all_http_responses(path_prefix: &str) -> String {
        format!("http:GET:{}*", path_prefix)
    }
}

/// A glob over cache keys, expressible against both the L1 key enumeration
/// and the Redis `MATCH` scan argument.
///
/// `*` matches any run of characters; everything else matches literally.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    raw: String,
    segments: Vec<String>,
}

impl KeyPattern {
    /// Parse a glob pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let segments = raw.split('*').map(str::to_string).collect();
        Self { raw, segments }
    }

    /// The pattern as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The pattern rendered for the Redis `MATCH` argument.
    ///
    /// Redis globs also treat `?`, `[` and `]` as syntax; this type does
    /// not, so those characters (and `\`) are escaped to keep both tiers
    /// matching the same key set.
    pub fn as_redis_match(&self) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for ch in self.raw.chars() {
            if matches!(ch, '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(ch);
        }
        out
    }

    /// Test a key against the pattern.
    pub fn matches(&self, key: &str) -> bool {
        let mut remainder = key;
        for (i, segment) in self.segments.iter().enumerate() {
            let first = i == 0;
            let last = i == self.segments.len() - 1;

            if first && last {
                return remainder == segment;
            }
            if first {
                match remainder.strip_prefix(segment.as_str()) {
                    Some(rest) => remainder = rest,
                    None => return false,
                }
            } else if last {
                return segment.is_empty() || remainder.ends_with(segment.as_str());
            } else {
                match remainder.find(segment.as_str()) {
                    Some(pos) => remainder = &remainder[pos + segment.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

/// Build a stable key segment from a parameter object.
///
/// Rebuilding through `serde_json::Value` sorts object keys (the default
/// map is BTree-backed), so semantically equal parameter sets produce
/// byte-identical keys regardless of construction order.
pub fn params_key(prefix: &str, params: &Value) -> String {
    format!("{}:{}", prefix, encode_segment(&params.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cart_keys() {
        assert_eq!(cart::items("user_123"), "cart:user_123:items");
        assert_eq!(cart::summary("user_123"), "cart:user_123:summary");
        assert_eq!(cart::count("user_123"), "cart:user_123:count");
        assert_eq!(cart::validation("user_123"), "cart:user_123:validation");
        assert_eq!(cart::item("user_123", "prod_456"), "cart:user_123:item:prod_456");
    }

    #[test]
    fn test_farm_keys() {
        assert_eq!(farm::details("farm_123"), "farm:farm_123:details");
        assert_eq!(farm::by_slug("organic-valley-farm"), "farm:slug:organic-valley-farm");
        assert_eq!(farm::list(1, 20), "farms:list:page:1:limit:20");
        assert_eq!(farm::by_owner("user_456"), "farms:owner:user_456");
        assert_eq!(farm::stats("farm_123"), "farm:farm_123:stats");
        assert_eq!(farm::products_count("farm_123"), "farm:farm_123:products:count");
        assert_eq!(farm::verification("farm_123"), "farm:farm_123:verification");
        assert_eq!(farm::seasonal("farm_123", "SPRING"), "farm:farm_123:season:SPRING");
        assert_ne!(farm::list(1, 20), farm::list(2, 20));
        assert_ne!(farm::list(1, 20), farm::list(1, 50));
    }

    #[test]
    fn test_product_keys() {
        assert_eq!(product::details("prod_123"), "product:prod_123:details");
        assert_eq!(product::by_slug("fresh-tomatoes"), "product:slug:fresh-tomatoes");
        assert_eq!(
            product::by_farm_and_slug("organic-valley", "fresh-tomatoes"),
            "product:farm:organic-valley:slug:fresh-tomatoes"
        );
        assert_eq!(
            product::by_farm("farm_456", 1, 20),
            "products:farm:farm_456:page:1:limit:20"
        );
        assert_eq!(product::search("tomato", 1), "products:search:tomato:page:1");
        assert_eq!(product::inventory("prod_123"), "product:prod_123:inventory");
        assert_eq!(product::related("prod_123", 5), "product:prod_123:related:limit:5");
        assert_eq!(product::seasonal("SPRING", 1), "products:season:SPRING:page:1");
        assert_eq!(
            product::by_category("vegetables", 1),
            "products:category:vegetables:page:1"
        );
    }

    #[test]
    fn test_order_keys() {
        assert_eq!(order::details("order_123"), "order:order_123:details");
        assert_eq!(
            order::by_user("user_456", 1, 20),
            "orders:user:user_456:page:1:limit:20"
        );
        assert_eq!(
            order::by_farm("farm_789", 1, 20),
            "orders:farm:farm_789:page:1:limit:20"
        );
        assert_eq!(order::user_stats("user_456"), "orders:user:user_456:stats");
        assert_eq!(order::farm_stats("farm_789"), "orders:farm:farm_789:stats");
        assert_eq!(order::status("order_123"), "order:order_123:status");
        assert_eq!(order::recent(10), "orders:recent:limit:10");
        assert_eq!(
            order::by_date_range("farm_789", "2024-01-01", "2024-12-31"),
            "orders:farm:farm_789:range:2024-01-01:2024-12-31"
        );
    }

    #[test]
    fn test_user_keys() {
        assert_eq!(user::profile("user_123"), "user:user_123:profile");
        assert_eq!(user::preferences("user_123"), "user:user_123:preferences");
        assert_eq!(user::addresses("user_123"), "user:user_123:addresses");
        assert_eq!(user::by_email("john@example.com"), "user:email:john@example.com");
        assert_eq!(user::favorites("user_123"), "user:user_123:favorites");
    }

    #[test]
    fn test_checkout_and_payment_keys() {
        assert_eq!(checkout::session("sess_123"), "checkout:session:sess_123");
        assert_eq!(
            checkout::validation("user_456"),
            "checkout:user:user_456:validation"
        );
        assert_eq!(checkout::shipping_options("user_456"), "checkout:shipping:user_456");
        assert_eq!(checkout::payment_methods("user_456"), "checkout:payment:user_456");
        assert_eq!(payment::intent("pi_123"), "payment:intent:pi_123");
        assert_eq!(payment::methods("user_456"), "payment:user:user_456:methods");
        assert_eq!(payment::history("user_456"), "payment:user:user_456:history");
    }

    #[test]
    fn test_location_keys() {
        assert_eq!(
            location::reverse_geocode(40.7128, -74.0060),
            "location:reverse:40.7128:-74.006"
        );
        assert_eq!(
            location::nearby_farms(40.7128, -74.0060, 10),
            "location:nearby:40.7128:-74.006:radius:10"
        );
        let key = location::geocode("1234 Main St");
        assert!(key.starts_with("location:geocode:"));
        assert!(key.contains("1234"));
        assert!(key.contains("Main"));
        // Delimiter characters never leak into the segment
        let encoded = location::geocode("a:b*c");
        let segment = encoded.strip_prefix("location:geocode:").unwrap();
        assert!(!segment.contains(':'));
        assert!(!segment.contains('*'));
    }

    #[test]
    fn test_agricultural_and_analytics_keys() {
        assert_eq!(
            agricultural::seasonal_data("SPRING"),
            "agricultural:season:SPRING:data"
        );
        assert_eq!(
            agricultural::planting_calendar(2024),
            "agricultural:planting:calendar:2024"
        );
        assert_eq!(
            agricultural::harvest_schedule("farm_123", "FALL"),
            "agricultural:harvest:farm_123:season:FALL"
        );
        assert_eq!(
            analytics::farm_metrics("farm_123", "2024-01-01", "2024-12-31"),
            "analytics:farm:farm_123:range:2024-01-01:2024-12-31"
        );
        assert_eq!(
            analytics::product_performance("prod_456", "30d"),
            "analytics:product:prod_456:period:30d"
        );
        assert_eq!(
            analytics::dashboard_summary("farm_123"),
            "analytics:dashboard:farm_123:summary"
        );
    }

    #[test]
    fn test_http_keys_sort_query_params() {
        let a = http::response(
            "get",
            "/api/farms",
            &[("page".into(), "1".into()), ("limit".into(), "20".into())],
        );
        let b = http::response(
            "GET",
            "/api/farms",
            &[("limit".into(), "20".into()), ("page".into(), "1".into())],
        );
        assert_eq!(a, b);
        assert_eq!(a, "http:GET:/api/farms?limit=20&page=1");
        assert_eq!(http::response("GET", "/", &[]), "http:GET:/");
    }

    #[test]
    fn test_patterns() {
        assert_eq!(patterns::all_user_cart("user_123"), "cart:user_123:*");
        assert_eq!(patterns::all_farm_data("farm_456"), "farm:farm_456:*");
        assert_eq!(patterns::all_farm_products("farm_456"), "products:farm:farm_456:*");
        assert_eq!(patterns::all_user_orders("user_123"), "orders:user:user_123:*");
        assert_eq!(patterns::all_farm_orders("farm_456"), "orders:farm:farm_456:*");
        assert_eq!(patterns::all_product_data("prod_789"), "product:prod_789:*");
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = KeyPattern::new("farm:1:*");
        assert!(pattern.matches("farm:1:profile"));
        assert!(pattern.matches("farm:1:products"));
        assert!(!pattern.matches("farm:2:profile"));
        assert!(!pattern.matches("farms:1:profile"));

        let exact = KeyPattern::new("farm:1:details");
        assert!(exact.matches("farm:1:details"));
        assert!(!exact.matches("farm:1:details:extra"));

        let middle = KeyPattern::new("orders:*:stats");
        assert!(middle.matches("orders:user:u1:stats"));
        assert!(!middle.matches("orders:user:u1:page:1"));
    }

    #[test]
    fn test_redis_match_escapes_foreign_glob_syntax() {
        // `*` is the only wildcard this type supports; it passes through
        assert_eq!(KeyPattern::new("farm:1:*").as_redis_match(), "farm:1:*");

        // Redis-only glob characters in a literal key match literally
        let pattern = KeyPattern::new("user:email:jo?n[1]@example.com:*");
        assert_eq!(
            pattern.as_redis_match(),
            "user:email:jo\\?n\\[1\\]@example.com:*"
        );
        assert!(pattern.matches("user:email:jo?n[1]@example.com:profile"));
        assert!(!pattern.matches("user:email:john1@example.com:profile"));
    }

    #[test]
    fn test_params_key_is_order_independent() {
        let a = json!({"category": "vegetables", "organic": true, "page": 2});
        let b = json!({"page": 2, "organic": true, "category": "vegetables"});
        assert_eq!(params_key("farms:search", &a), params_key("farms:search", &b));
        assert!(params_key("farms:search", &a).starts_with("farms:search:"));
    }
}
