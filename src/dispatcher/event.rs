use crate::hooks::HookType;

/// Run-time wrapper around a dispatched hook.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub target: String,
    pub hook_type: HookType,
    pub priority: u8,
    pub order: u32,
    /// Discovery position of the hook within its stage.
    pub index: usize,
    /// `pre` hooks wrapping this one; they run first and feed it their output.
    pub pre_sources: Vec<String>,
    /// Post hooks attached to this one; they consume its output.
    pub post_sources: Vec<String>,
    pub previous_map: Vec<String>,
    pub next_map: Vec<String>,
    /// Breadth-first layers from this hook through its successors.
    pub execution_path: Vec<Vec<String>>,
}

impl Event {
    pub fn new(target: &str, hook_type: HookType, priority: u8, order: u32, index: usize) -> Self {
        Self {
            target: target.to_string(),
            hook_type,
            priority,
            order,
            index,
            pre_sources: Vec::new(),
            post_sources: Vec::new(),
            previous_map: Vec::new(),
            next_map: Vec::new(),
            execution_path: Vec::new(),
        }
    }

    /// Scheduling key: priority first, then declared order.
    pub fn key(&self) -> (u8, u32) {
        (self.priority, self.order)
    }

    pub fn is_root(&self) -> bool {
        self.previous_map.is_empty()
    }
}
