use std::sync::Arc;
use std::time::Instant;

use crate::memory::InMemoryOrderRepository;
use crate::provisioner::Provisioner;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    provisioner: Arc<Provisioner>,
    orders: Arc<InMemoryOrderRepository>,
}

impl AppState {
    pub fn new(provisioner: Provisioner, orders: Arc<InMemoryOrderRepository>) -> Self {
        Self {
            start: Instant::now(),
            provisioner: Arc::new(provisioner),
            orders,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn orders(&self) -> &InMemoryOrderRepository {
        &self.orders
    }
}
