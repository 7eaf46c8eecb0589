//! Product Catalog
//!
//! Products are either persisted by merchants or served from a small static
//! table of showcase products. Sessions and sales only ever hold the product
//! id; the catalog is read when a checkout is displayed or a sale settles.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{PaymentError, Result};

/// A sellable digital product
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Delivered to the buyer once the sale settles
    pub content_link: String,
    #[serde(default)]
    pub pixel_id: Option<String>,
    /// API token for the attribution service
    #[serde(default)]
    pub utmify_id: Option<String>,
    /// Merchant endpoint notified with `order.paid`
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub is_mock: bool,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: Decimal,
        content_link: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            image: None,
            description: None,
            content_link: content_link.into(),
            pixel_id: None,
            utmify_id: None,
            webhook_url: None,
            is_mock: false,
        }
    }
}

/// (id, name, price, content link, pixel id, attribution token)
const MOCK_PRODUCTS: [(&str, &str, Decimal, &str, &str, &str); 3] = [
    (
        "101",
        "Curso de Marketing Digital",
        dec!(197.00),
        "https://mega.nz/file/mock-curso-mkt",
        "11111111111",
        "token-mock-1",
    ),
    (
        "102",
        "Mentoria Exclusiva de Vendas",
        dec!(497.00),
        "https://mega.nz/file/mock-mentoria",
        "22222222222",
        "token-mock-2",
    ),
    (
        "103",
        "E-book: Segredos do Tráfego Pago",
        dec!(250.00),
        "https://mega.nz/file/mock-ebook",
        "33333333333",
        "token-mock-3",
    ),
];

/// Whether `id` resolves through the static showcase table
pub fn is_mock_product(id: &str) -> bool {
    MOCK_PRODUCTS.iter().any(|(mock_id, ..)| *mock_id == id)
}

/// Look up a showcase product
pub fn mock_product(id: &str) -> Option<Product> {
    MOCK_PRODUCTS
        .iter()
        .find(|(mock_id, ..)| *mock_id == id)
        .map(|(id, name, price, link, pixel, utmify)| Product {
            pixel_id: Some((*pixel).to_string()),
            utmify_id: Some((*utmify).to_string()),
            is_mock: true,
            ..Product::new(*id, *name, *price, *link)
        })
}

/// Product storage trait
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Get a product by id, mock or persisted
    async fn get(&self, id: &str) -> Result<Option<Product>>;

    /// Persist a merchant product
    async fn insert(&self, product: Product) -> Result<()>;

    /// All products, showcase first
    async fn list(&self) -> Result<Vec<Product>>;
}

/// In-memory catalog (for development)
pub struct MemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            products: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get(&self, id: &str) -> Result<Option<Product>> {
        if let Some(product) = mock_product(id) {
            return Ok(Some(product));
        }
        let products = self.products.read()?;
        Ok(products.get(id).cloned())
    }

    async fn insert(&self, mut product: Product) -> Result<()> {
        if is_mock_product(&product.id) {
            return Err(PaymentError::Conflict(format!(
                "product id {} is reserved",
                product.id
            )));
        }
        product.is_mock = false;

        let mut products = self.products.write()?;
        if products.contains_key(&product.id) {
            return Err(PaymentError::Conflict(format!(
                "product {} already exists",
                product.id
            )));
        }
        products.insert(product.id.clone(), product);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Product>> {
        let mut all: Vec<Product> = MOCK_PRODUCTS
            .iter()
            .filter_map(|(id, ..)| mock_product(id))
            .collect();

        let products = self.products.read()?;
        let mut persisted: Vec<Product> = products.values().cloned().collect();
        persisted.sort_by(|a, b| a.id.cmp(&b.id));
        all.extend(persisted);
        Ok(all)
    }
}
