//! Entity payloads shared by the local store and the remote authority

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kinds of records the sync subsystem reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Product,
    Customer,
    Order,
    Sale,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [Self::Product, Self::Customer, Self::Order, Self::Sale];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Customer => "customer",
            Self::Order => "order",
            Self::Sale => "sale",
        }
    }

    /// Local table and remote collection name (`/products`, `/customers`, ...).
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Product => "products",
            Self::Customer => "customers",
            Self::Order => "orders",
            Self::Sale => "sales",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "product" | "products" => Ok(Self::Product),
            "customer" | "customers" => Ok(Self::Customer),
            "order" | "orders" => Ok(Self::Order),
            "sale" | "sales" => Ok(Self::Sale),
            other => Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// A product on the shop's shelf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
}

impl Product {
    #[must_use]
    pub fn new(name: impl Into<String>, price: f64, stock: i64) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
            category: None,
            barcode: None,
        }
    }
}

/// A shop customer, identified naturally by phone number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub name: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub loyalty_points: i64,
}

impl Customer {
    #[must_use]
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            email: None,
            loyalty_points: 0,
        }
    }
}

/// One line of an order or sale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl LineItem {
    #[allow(clippy::cast_precision_loss)]
    pub fn subtotal(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// A customer order awaiting fulfilment or payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
    pub items: Vec<LineItem>,
    pub total: f64,
    #[serde(default = "default_order_status")]
    pub status: String,
}

fn default_order_status() -> String {
    "pending".to_string()
}

/// A completed sale at the counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub items: Vec<LineItem>,
    pub total: f64,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

fn default_payment_method() -> String {
    "cash".to_string()
}

/// Tagged union over every entity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Entity {
    Product(Product),
    Customer(Customer),
    Order(Order),
    Sale(Sale),
}

impl Entity {
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Product(_) => EntityKind::Product,
            Self::Customer(_) => EntityKind::Customer,
            Self::Order(_) => EntityKind::Order,
            Self::Sale(_) => EntityKind::Sale,
        }
    }

    /// Serialize to the untagged object shape used by the REST API.
    pub fn to_wire(&self) -> Result<serde_json::Value> {
        let value = match self {
            Self::Product(product) => serde_json::to_value(product)?,
            Self::Customer(customer) => serde_json::to_value(customer)?,
            Self::Order(order) => serde_json::to_value(order)?,
            Self::Sale(sale) => serde_json::to_value(sale)?,
        };
        Ok(value)
    }

    /// Parse the REST API object shape for the given kind.
    ///
    /// Unknown fields (such as `id` or `updatedAt`) are ignored.
    pub fn from_wire(kind: EntityKind, value: serde_json::Value) -> Result<Self> {
        let entity = match kind {
            EntityKind::Product => Self::Product(serde_json::from_value(value)?),
            EntityKind::Customer => Self::Customer(serde_json::from_value(value)?),
            EntityKind::Order => Self::Order(serde_json::from_value(value)?),
            EntityKind::Sale => Self::Sale(serde_json::from_value(value)?),
        };
        Ok(entity)
    }

    /// Reject payloads the remote authority would refuse outright.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Product(product) => {
                if product.name.trim().is_empty() {
                    return Err(Error::InvalidInput("product name cannot be empty".into()));
                }
                if !product.price.is_finite() || product.price < 0.0 {
                    return Err(Error::InvalidInput(
                        "product price must be a non-negative number".into(),
                    ));
                }
            }
            Self::Customer(customer) => {
                if customer.name.trim().is_empty() {
                    return Err(Error::InvalidInput("customer name cannot be empty".into()));
                }
                if customer.phone.trim().is_empty() {
                    return Err(Error::InvalidInput("customer phone cannot be empty".into()));
                }
            }
            Self::Order(Order { items, .. }) | Self::Sale(Sale { items, .. }) => {
                if items.is_empty() {
                    return Err(Error::InvalidInput(format!(
                        "{} must contain at least one item",
                        self.kind()
                    )));
                }
                if items.iter().any(|item| item.quantity <= 0) {
                    return Err(Error::InvalidInput("item quantity must be positive".into()));
                }
            }
        }
        Ok(())
    }
}

/// Typed mapping between a concrete payload and the [`Entity`] union.
pub trait TypedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn into_entity(self) -> Entity;

    fn from_entity(entity: Entity) -> Option<Self>;
}

macro_rules! typed_entity {
    ($ty:ident, $kind:ident) => {
        impl TypedEntity for $ty {
            const KIND: EntityKind = EntityKind::$kind;

            fn into_entity(self) -> Entity {
                Entity::$kind(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$kind(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

typed_entity!(Product, Product);
typed_entity!(Customer, Customer);
typed_entity!(Order, Order);
typed_entity!(Sale, Sale);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kind_parses_singular_and_plural() {
        assert_eq!("product".parse::<EntityKind>().unwrap(), EntityKind::Product);
        assert_eq!("Sales".parse::<EntityKind>().unwrap(), EntityKind::Sale);
        assert!("invoice".parse::<EntityKind>().is_err());
    }

    #[test]
    fn wire_shape_is_untagged_camel_case() {
        let entity = Entity::Customer(Customer::new("Wanjiru", "+254700000001"));
        let wire = entity.to_wire().unwrap();
        assert_eq!(
            wire,
            serde_json::json!({"name": "Wanjiru", "phone": "+254700000001", "loyaltyPoints": 0})
        );
    }

    #[test]
    fn from_wire_ignores_server_fields() {
        let wire = serde_json::json!({
            "id": 501,
            "updatedAt": 1_700_000_000_000_i64,
            "name": "Milk",
            "price": 60,
            "stock": 20
        });
        let entity = Entity::from_wire(EntityKind::Product, wire).unwrap();
        assert_eq!(entity, Entity::Product(Product::new("Milk", 60.0, 20)));
    }

    #[test]
    fn typed_mapping_rejects_other_kinds() {
        let entity = Product::new("Bread", 55.0, 10).into_entity();
        assert_eq!(entity.kind(), EntityKind::Product);
        assert!(Customer::from_entity(entity.clone()).is_none());
        assert_eq!(
            Product::from_entity(entity),
            Some(Product::new("Bread", 55.0, 10))
        );
    }

    #[test]
    fn validate_rejects_empty_names_and_items() {
        assert!(Entity::Product(Product::new(" ", 10.0, 1)).validate().is_err());
        assert!(Entity::Product(Product::new("Sugar", -1.0, 1)).validate().is_err());
        let sale = Entity::Sale(Sale {
            items: Vec::new(),
            total: 0.0,
            payment_method: "cash".into(),
            customer_phone: None,
        });
        assert!(sale.validate().is_err());
    }

    #[test]
    fn line_item_subtotal_multiplies_quantity() {
        let item = LineItem {
            product_name: "Milk".into(),
            quantity: 3,
            unit_price: 60.0,
        };
        assert!((item.subtotal() - 180.0).abs() < f64::EPSILON);
    }
}
