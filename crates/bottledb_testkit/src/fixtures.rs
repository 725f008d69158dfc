//! Test fixtures and store helpers.
//!
//! Provides the sample shop schema used across the test suites and
//! convenience functions for opening throwaway stores.

use bottledb_core::{
    Config, Entity, FieldDescriptor, FieldType, Schema, Store, TypeDescriptor, Value,
};
use bottledb_storage::{FileSystem, MemoryFileSystem, OsFileSystem};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Type name of the sample customer.
pub const CUSTOMER: &str = "shop.Customer";
/// Type name of the sample order line item.
pub const ITEM: &str = "shop.Item";
/// Type name of the sample order.
pub const ORDER: &str = "shop.Order";
/// Type name of the sample address composite.
pub const ADDRESS: &str = "shop.Address";
/// Type name of the sample order status enumeration.
pub const STATUS: &str = "shop.Status";

/// The sample shop schema.
///
/// - `shop.Customer`: `email` (unique), `name`, `address`
/// - `shop.Item`: `sku`, `qty`, `manual` (file attachment)
/// - `shop.Order`: `customer`, `items` (cascade), `note`, `status`, `placed`
pub fn shop_schema() -> Schema {
    Schema::from_types([
        TypeDescriptor::composite(ADDRESS)
            .field(FieldDescriptor::new("street", FieldType::Str))
            .field(FieldDescriptor::new("city", FieldType::Str)),
        TypeDescriptor::enumeration(STATUS, ["open", "paid", "shipped"]),
        TypeDescriptor::entity(CUSTOMER)
            .field(FieldDescriptor::new("email", FieldType::Str).unique())
            .field(FieldDescriptor::new("name", FieldType::Str))
            .field(FieldDescriptor::new("address", FieldType::Composite(ADDRESS.into()))),
        TypeDescriptor::entity(ITEM)
            .field(FieldDescriptor::new("sku", FieldType::Str))
            .field(FieldDescriptor::new("qty", FieldType::Int))
            .field(FieldDescriptor::new("manual", FieldType::File)),
        TypeDescriptor::entity(ORDER)
            .field(FieldDescriptor::new("customer", FieldType::Entity(CUSTOMER.into())))
            .field(FieldDescriptor::new("items", FieldType::List).cascade())
            .field(FieldDescriptor::new("note", FieldType::Str))
            .field(FieldDescriptor::new("status", FieldType::Enum(STATUS.into())))
            .field(FieldDescriptor::new("placed", FieldType::Date)),
    ])
    .expect("shop schema is consistent")
}

/// A new customer.
pub fn customer(email: &str, name: &str) -> Entity {
    Entity::new(CUSTOMER).with("email", email).with("name", name)
}

/// A new line item.
pub fn item(sku: &str, qty: i64) -> Entity {
    Entity::new(ITEM).with("sku", sku).with("qty", qty)
}

/// A new open order of `customer` holding `items`.
pub fn order(customer: &Entity, items: &[Entity]) -> Entity {
    let items: Vec<Value> = items.iter().cloned().map(Value::Entity).collect();
    Entity::new(ORDER)
        .with("customer", customer.clone())
        .with("items", items)
        .with("status", Value::enumeration(STATUS, "open"))
}

/// A store that cleans up after itself.
///
/// The file system and root are kept so the store can be closed and
/// opened again, which runs recovery.
pub struct TestStore {
    store: Option<Store>,
    fs: Arc<dyn FileSystem>,
    root: PathBuf,
    schema: Schema,
    config: Config,
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Opens a store on a fresh in-memory file system.
    pub fn memory(schema: Schema) -> Self {
        Self::on(Arc::new(MemoryFileSystem::new()), "/bottledb", schema, Config::default())
    }

    /// Opens a store in a temporary directory.
    pub fn file(schema: Schema) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().join("store");
        let mut test_store = Self::on(
            Arc::new(OsFileSystem::new()),
            root,
            schema,
            Config::default().sync_writes(false),
        );
        test_store._temp_dir = Some(temp_dir);
        test_store
    }

    /// Opens a store on any file system, typically a
    /// [`crate::faults::FaultyFileSystem`].
    pub fn on(
        fs: Arc<dyn FileSystem>,
        root: impl Into<PathBuf>,
        schema: Schema,
        config: Config,
    ) -> Self {
        let root = root.into();
        let store = Store::open_with_fs(Arc::clone(&fs), root.clone(), schema.clone(), config.clone())
            .expect("Failed to open test store");
        Self {
            store: Some(store),
            fs,
            root,
            schema,
            config,
            _temp_dir: None,
        }
    }

    /// Closes the store and opens it again on the same file system.
    pub fn reopen(&mut self) -> &Store {
        self.store = None;
        let store = Store::open_with_fs(
            Arc::clone(&self.fs),
            self.root.clone(),
            self.schema.clone(),
            self.config.clone(),
        )
        .expect("Failed to reopen test store");
        self.store.insert(store)
    }

    /// The store.
    pub fn store(&self) -> &Store {
        self.store.as_ref().expect("test store is open")
    }

    /// The file system under the store.
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files below the store root, relative to it, excluding the lock file.
    pub fn files(&self) -> Vec<String> {
        let mut files = Vec::new();
        collect_files(self.fs.as_ref(), &self.root, "", &mut files);
        files.retain(|f| f != "LOCK");
        files
    }
}

fn collect_files(fs: &dyn FileSystem, dir: &Path, prefix: &str, out: &mut Vec<String>) {
    for entry in fs.list(dir).unwrap_or_default() {
        let rel = if prefix.is_empty() {
            entry.name.clone()
        } else {
            format!("{prefix}/{}", entry.name)
        };
        if entry.is_dir {
            collect_files(fs, &dir.join(&entry.name), &rel, out);
        } else {
            out.push(rel);
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        self.store()
    }
}

/// Runs a test with an in-memory shop store.
///
/// # Example
///
/// ```rust,ignore
/// use bottledb_testkit::{customer, with_temp_store};
///
/// with_temp_store(|store| {
///     store.save(&customer("ada@example.com", "Ada")).unwrap();
/// });
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::memory(shop_schema());
    f(&test_store)
}

/// Runs a test with a shop store in a temporary directory.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store, &Path) -> R,
{
    let test_store = TestStore::file(shop_schema());
    f(&test_store, test_store.root())
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A shop store with `orders` saved orders of one customer, each with
    /// two items. Returns the store, the customer and the orders.
    pub fn populated_shop(orders: usize) -> (TestStore, Entity, Vec<Entity>) {
        let test_store = TestStore::memory(shop_schema());
        let buyer = customer("ada@example.com", "Ada");
        let mut saved = Vec::with_capacity(orders);
        for i in 0..orders {
            let order = order(
                &buyer,
                &[item(&format!("sku-{i}-a"), 1), item(&format!("sku-{i}-b"), 2)],
            );
            test_store.save(&order).expect("Failed to save order");
            saved.push(order);
        }
        (test_store, buyer, saved)
    }
}
