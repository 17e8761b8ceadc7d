// Borrow/return round trip against a factory-backed pool.
// Run with: cargo run --example basic

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lendpool::{BoxError, ObjectPool, PoolConfig, PooledObjectFactory};

#[derive(Debug)]
struct Connection {
    id: u32,
}

#[derive(Default)]
struct ConnectionFactory {
    next_id: AtomicU32,
}

impl PooledObjectFactory<Connection> for ConnectionFactory {
    fn make_object(&self) -> Result<Connection, BoxError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("  factory: opening connection {id}");
        Ok(Connection { id })
    }

    fn validate_object(&self, conn: &Connection) -> bool {
        conn.id < u32::MAX
    }

    fn destroy_object(&self, conn: &Connection) {
        println!("  factory: closing connection {}", conn.id);
    }
}

fn main() {
    let config = PoolConfig::new()
        .with_max_total(4)
        .with_max_idle(2)
        .with_test_on_borrow(true)
        .with_max_wait(Duration::from_secs(5));

    let pool = ObjectPool::new(Arc::new(ConnectionFactory::default()), config);
    pool.prefill(2);
    println!("prefilled: {} idle", pool.num_idle());

    let a = pool.borrow_object().unwrap();
    let b = pool.borrow_object().unwrap();
    println!("borrowed connections {} and {}", a.id, b.id);
    println!("active: {}, idle: {}", pool.num_active(), pool.num_idle());

    pool.return_object(&a).unwrap();
    pool.return_object(&b).unwrap();
    println!("returned both; idle: {}", pool.num_idle());

    pool.close();
    println!("closed; destroyed {} objects total", pool.destroyed_count());
}
