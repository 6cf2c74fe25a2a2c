//! Server-side thread context
//!
//! Mirrors one client thread context: the interned property table, the
//! pre-reserved code region, and the well-known host type id. All state a
//! compilation reads lives here or on the owning script context, so the
//! call body itself never touches the registry lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::codespace::{AllocationKind, CodeSpace};
use crate::{ServiceError, ServiceResult};
use vireo_engine::property::{PropertyId, PropertyRecord, PropertyTable};
use vireo_jit_proto::workitem::ThreadContextData;

/// Server mirror of a client thread context
pub struct ServerThreadContext {
    process_id: u32,
    client_base_addr: u64,
    closed: AtomicBool,
    properties: Mutex<PropertyTable>,
    code: Mutex<CodeSpace>,
    well_known_host_type: AtomicU32,
}

impl ServerThreadContext {
    /// Mirror a freshly registered client thread context. `region_base` is
    /// the client-space base assigned to its code region.
    pub fn new(data: &ThreadContextData, region_base: u64) -> Self {
        Self {
            process_id: data.process_id,
            client_base_addr: data.client_base_addr,
            closed: AtomicBool::new(false),
            properties: Mutex::new(PropertyTable::new()),
            code: Mutex::new(CodeSpace::new(region_base)),
            well_known_host_type: AtomicU32::new(0),
        }
    }

    /// Owning client process id
    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    /// Base address of the client executable image
    pub fn client_base_addr(&self) -> u64 {
        self.client_base_addr
    }

    /// True once the context has been torn down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the context closed. Returns false when it already was.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Apply one property-map delta from the client
    pub fn update_property_map(&self, added: Vec<PropertyRecord>, removed: Vec<PropertyId>) {
        let mut table = self.properties.lock();
        for record in added {
            table.insert_record(record);
        }
        for id in removed {
            table.remove(id);
        }
    }

    /// Look up a mirrored property record by id
    pub fn property_name(&self, id: PropertyId) -> Option<String> {
        self.properties.lock().get(id).map(|r| r.name.clone())
    }

    /// Mirrored property-record count
    pub fn property_count(&self) -> usize {
        self.properties.lock().len()
    }

    /// Record the host's well-known type id
    pub fn set_well_known_host_type(&self, type_id: u32) {
        self.well_known_host_type.store(type_id, Ordering::Release);
    }

    /// The recorded well-known host type id, zero when unset
    pub fn well_known_host_type(&self) -> u32 {
        self.well_known_host_type.load(Ordering::Acquire)
    }

    /// Client-space base of the pre-reserved code region
    pub fn region_base(&self) -> u64 {
        self.code.lock().base()
    }

    /// Size of the pre-reserved code region
    pub fn region_size(&self) -> u64 {
        self.code.lock().size()
    }

    /// Carve an allocation out of the code region
    pub fn allocate(&self, size: u64, kind: AllocationKind) -> ServiceResult<u64> {
        self.code.lock().allocate(size, kind)
    }

    /// Release one allocation by its base address
    pub fn free_allocation(&self, addr: u64) -> ServiceResult<()> {
        if self.code.lock().free(addr) {
            Ok(())
        } else {
            Err(ServiceError::InvalidArg)
        }
    }

    /// True when the address lies inside a live allocation
    pub fn is_native_addr(&self, addr: u64) -> bool {
        self.code.lock().is_native_addr(addr)
    }

    /// Live allocation count, for teardown diagnostics
    pub fn allocation_count(&self) -> usize {
        self.code.lock().allocation_count()
    }
}

impl std::fmt::Debug for ServerThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerThreadContext")
            .field("process_id", &self.process_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
