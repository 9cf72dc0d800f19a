//! Order domain types
//!
//! - [`Category`] - the closed set of brewable drinks
//! - [`Item`] - one line of a customer's order
//! - [`Customer`] - the descriptor a client presents at connect time
//! - [`OrderTicket`] - the unit of work that moves through the pipeline

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::{CustomerId, TicketSerial};

/// Error parsing an item or category from its text form
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseItemError {
    #[error("unknown category: {0:?}")]
    UnknownCategory(String),

    #[error("quantity must be a positive integer, got {0:?}")]
    InvalidQuantity(String),
}

// ============================================================
// CATEGORY
// ============================================================

/// Beverage category. Defines the brew duration and which capacity
/// counter an item charges against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Tea,
    Coffee,
}

impl Category {
    /// All categories, in capacity-counter index order.
    pub const ALL: [Category; 2] = [Category::Tea, Category::Coffee];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tea => "tea",
            Self::Coffee => "coffee",
        }
    }

    /// Index into per-category counter arrays.
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Self::Tea => 0,
            Self::Coffee => 1,
        }
    }
}

impl FromStr for Category {
    type Err = ParseItemError;

    /// Case is normalized, so "Tea" and "COFFEE" are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tea" => Ok(Self::Tea),
            "coffee" => Ok(Self::Coffee),
            other => Err(ParseItemError::UnknownCategory(other.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ============================================================
// ITEM
// ============================================================

/// One line of an order: `(quantity, category)`.
///
/// Text form is `"<qty> <category>"`, e.g. `"2 coffee"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub qty: u32,
    pub category: Category,
}

impl Item {
    pub fn new(qty: u32, category: Category) -> Self {
        Self { qty, category }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.qty, self.category)
    }
}

impl FromStr for Item {
    type Err = ParseItemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let qty_raw = parts.next().unwrap_or("");
        let qty: u32 = qty_raw
            .parse()
            .map_err(|_| ParseItemError::InvalidQuantity(qty_raw.to_string()))?;
        if qty == 0 {
            return Err(ParseItemError::InvalidQuantity(qty_raw.to_string()));
        }
        let category: Category = parts.collect::<Vec<_>>().join(" ").parse()?;
        Ok(Self { qty, category })
    }
}

// ============================================================
// CUSTOMER DESCRIPTOR
// ============================================================

/// The first message a client sends: who they are and what they want.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
    pub items: Vec<Item>,
}

// ============================================================
// ORDER TICKET
// ============================================================

/// The pipeline's unit of work: one item instance bound to its owner.
///
/// The owner id is fixed at creation and never mutated. A ticket whose
/// owner is no longer in the active registry is "orphaned" and becomes a
/// candidate for reclamation.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub owner: CustomerId,
    pub serial: TicketSerial,
    pub item: Item,
}

impl OrderTicket {
    pub fn new(owner: CustomerId, serial: TicketSerial, item: Item) -> Self {
        Self {
            owner,
            serial,
            item,
        }
    }

    /// Human-readable instance key, for log lines.
    pub fn key(&self) -> String {
        format!("{}:{}#{}", self.owner, self.item, self.serial)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_normalizes_case() {
        assert_eq!("tea".parse::<Category>(), Ok(Category::Tea));
        assert_eq!("Tea".parse::<Category>(), Ok(Category::Tea));
        assert_eq!("COFFEE".parse::<Category>(), Ok(Category::Coffee));
        assert!(matches!(
            "espresso".parse::<Category>(),
            Err(ParseItemError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_item_text_form() {
        let item = Item::new(2, Category::Coffee);
        assert_eq!(item.to_string(), "2 coffee");

        assert_eq!("1 tea".parse::<Item>(), Ok(Item::new(1, Category::Tea)));
        assert_eq!(
            "3 Coffee".parse::<Item>(),
            Ok(Item::new(3, Category::Coffee))
        );
        assert!(matches!(
            "0 tea".parse::<Item>(),
            Err(ParseItemError::InvalidQuantity(_))
        ));
        assert!(matches!(
            "two tea".parse::<Item>(),
            Err(ParseItemError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_category_serde_is_lowercase_and_case_insensitive() {
        let json = serde_json::to_string(&Category::Coffee).unwrap();
        assert_eq!(json, "\"coffee\"");

        let parsed: Category = serde_json::from_str("\"TEA\"").unwrap();
        assert_eq!(parsed, Category::Tea);

        assert!(serde_json::from_str::<Category>("\"latte\"").is_err());
    }

    #[test]
    fn test_customer_descriptor_round_trip() {
        let customer = Customer {
            id: 7,
            name: "Ada".to_string(),
            items: vec![Item::new(1, Category::Tea), Item::new(2, Category::Coffee)],
        };
        let json = serde_json::to_string(&customer).unwrap();
        let back: Customer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, customer);
    }

    #[test]
    fn test_ticket_key_is_distinct_per_serial() {
        let a = OrderTicket::new(1, 10, Item::new(1, Category::Tea));
        let b = OrderTicket::new(1, 11, Item::new(1, Category::Tea));
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key(), "1:1 tea#10");
    }
}
