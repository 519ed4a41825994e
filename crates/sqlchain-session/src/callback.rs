//! Named, ordered callback chains.
//!
//! Every operation kind owns one [`Pipeline`]. Entries are registered
//! under unique names with optional `before`/`after` constraints, which
//! are resolved to a total order at registration time. A session holds its
//! [`Callbacks`] behind an `Arc` and copies them on first mutation, so a
//! registration on one session never leaks into its siblings.

use crate::scope::Scope;
use sqlchain_core::{CallbackError, Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A callback handler. Handlers report failure through the scope.
pub type Handler = Arc<dyn Fn(&mut Scope<'_>) + Send + Sync>;

/// The operation kinds that own a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Query,
    RowQuery,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Query => "query",
            Operation::RowQuery => "row_query",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
struct Entry {
    name: String,
    handler: Handler,
    before: Option<String>,
    after: Option<String>,
    /// Runs even after an earlier handler failed
    cleanup: bool,
}

/// One operation's callback chain.
#[derive(Clone)]
pub struct Pipeline {
    operation: Operation,
    entries: Vec<Entry>,
    /// Indices into `entries`, in execution order
    order: Vec<usize>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("operation", &self.operation)
            .field("names", &self.names())
            .finish()
    }
}

impl Pipeline {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            entries: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Entry names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.order
            .iter()
            .map(|&i| self.entries[i].name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.position(name).map(|i| Arc::clone(&self.entries[i].handler))
    }

    /// Run every handler in order.
    ///
    /// Once the scope holds an error, or a handler asked to skip the rest,
    /// only cleanup handlers still run.
    #[tracing::instrument(level = "trace", skip_all, fields(operation = self.operation.as_str()))]
    pub fn run(&self, scope: &mut Scope<'_>) {
        for &i in &self.order {
            let entry = &self.entries[i];
            if !entry.cleanup && (scope.has_error() || scope.skipped()) {
                continue;
            }
            tracing::trace!(callback = %entry.name, "Running callback");
            (entry.handler)(scope);
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Add an entry and re-resolve the order. An entry whose constraints
    /// close a cycle is rejected and the pipeline is left unchanged.
    #[allow(clippy::result_large_err)]
    pub(crate) fn push(
        &mut self,
        name: &str,
        handler: Handler,
        before: Option<String>,
        after: Option<String>,
        cleanup: bool,
    ) -> Result<()> {
        self.entries.push(Entry {
            name: name.to_string(),
            handler,
            before,
            after,
            cleanup,
        });
        match self.resolve() {
            Ok(order) => {
                self.order = order;
                Ok(())
            }
            Err(err) => {
                self.entries.pop();
                Err(err)
            }
        }
    }

    fn remove_at(&mut self, i: usize) {
        self.entries.remove(i);
        // Dropping an entry only drops edges, so the order stays acyclic.
        self.order = self
            .resolve()
            .unwrap_or_else(|_| (0..self.entries.len()).collect());
    }

    /// Index of the entry named by a constraint, ignoring unknown names
    /// and self references.
    fn constraint_target(&self, i: usize, name: Option<&String>) -> Option<usize> {
        let j = self.position(name?)?;
        (j != i).then_some(j)
    }

    /// Registration order, with each constrained entry moved next to the
    /// entry it names. Only used to break ties in [`Pipeline::resolve`].
    fn preferred(&self) -> Vec<usize> {
        let anchor = |i: usize| {
            let entry = &self.entries[i];
            self.constraint_target(i, entry.before.as_ref())
                .map(|j| (j, false))
                .or_else(|| self.constraint_target(i, entry.after.as_ref()).map(|j| (j, true)))
        };

        let (mut pending, mut list): (Vec<usize>, Vec<usize>) =
            (0..self.entries.len()).partition(|&i| anchor(i).is_some());
        loop {
            let waiting = pending.len();
            pending.retain(|&i| {
                let Some((target, after)) = anchor(i) else {
                    return false;
                };
                match list.iter().position(|&j| j == target) {
                    Some(pos) => {
                        list.insert(if after { pos + 1 } else { pos }, i);
                        false
                    }
                    None => true,
                }
            });
            if pending.len() == waiting {
                break;
            }
        }
        list.extend(pending);
        list
    }

    /// Topological order of the entries: every `before`/`after` that names
    /// a registered entry holds, and ties follow [`Pipeline::preferred`].
    #[allow(clippy::result_large_err)]
    fn resolve(&self) -> Result<Vec<usize>> {
        let n = self.entries.len();
        let mut rank = vec![0; n];
        for (pos, i) in self.preferred().into_iter().enumerate() {
            rank[i] = pos;
        }

        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(j) = self.constraint_target(i, entry.before.as_ref()) {
                successors[i].push(j);
                indegree[j] += 1;
            }
            if let Some(j) = self.constraint_target(i, entry.after.as_ref()) {
                successors[j].push(i);
                indegree[i] += 1;
            }
        }

        let mut ready: BTreeSet<(usize, usize)> = (0..n)
            .filter(|&i| indegree[i] == 0)
            .map(|i| (rank[i], i))
            .collect();
        let mut order = Vec::with_capacity(n);
        while let Some((_, i)) = ready.pop_first() {
            order.push(i);
            for &k in &successors[i] {
                indegree[k] -= 1;
                if indegree[k] == 0 {
                    ready.insert((rank[k], k));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }
        let stuck: Vec<&str> = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| self.entries[i].name.as_str())
            .collect();
        Err(Error::Callback(CallbackError {
            operation: self.operation.as_str(),
            name: self.entries.last().map(|e| e.name.clone()).unwrap_or_default(),
            message: format!("before/after constraints form a cycle through {}", stuck.join(", ")),
        }))
    }
}

/// Registration handle for one pipeline, carrying pending constraints.
pub struct Registrar<'a> {
    pipeline: &'a mut Pipeline,
    before: Option<String>,
    after: Option<String>,
    cleanup: bool,
}

impl<'a> Registrar<'a> {
    /// Place the next registration before `name`.
    pub fn before(mut self, name: &str) -> Self {
        self.before = Some(name.to_string());
        self
    }

    /// Place the next registration after `name`.
    pub fn after(mut self, name: &str) -> Self {
        self.after = Some(name.to_string());
        self
    }

    /// Mark the next registration as a cleanup handler.
    pub fn cleanup(mut self) -> Self {
        self.cleanup = true;
        self
    }

    /// Register a new handler. An existing name is an error; use
    /// [`Registrar::replace`] to swap a handler.
    pub fn register<F>(self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut Scope<'_>) + Send + Sync + 'static,
    {
        if self.pipeline.contains(name) {
            return Err(Error::Callback(CallbackError {
                operation: self.pipeline.operation.as_str(),
                name: name.to_string(),
                message: "already registered, use replace to override it".to_string(),
            }));
        }
        tracing::debug!(
            operation = self.pipeline.operation.as_str(),
            callback = name,
            "Registering callback"
        );
        self.pipeline
            .push(name, Arc::new(handler), self.before, self.after, self.cleanup)
    }

    /// Swap the handler registered under `name`, keeping its position.
    /// A name that is not registered yet is added as by
    /// [`Registrar::register`].
    pub fn replace<F>(self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(&mut Scope<'_>) + Send + Sync + 'static,
    {
        match self.pipeline.position(name) {
            Some(i) => {
                self.pipeline.entries[i].handler = Arc::new(handler);
                Ok(())
            }
            None => {
                tracing::warn!(
                    operation = self.pipeline.operation.as_str(),
                    callback = name,
                    "Replacing a callback that is not registered; adding it"
                );
                self.pipeline
                    .push(name, Arc::new(handler), self.before, self.after, self.cleanup)
            }
        }
    }

    /// Remove the handler registered under `name`.
    pub fn remove(self, name: &str) -> bool {
        match self.pipeline.position(name) {
            Some(i) => {
                self.pipeline.remove_at(i);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.pipeline.get(name)
    }
}

/// The five pipelines of a session.
#[derive(Clone, Debug)]
pub struct Callbacks {
    creates: Pipeline,
    updates: Pipeline,
    deletes: Pipeline,
    queries: Pipeline,
    row_queries: Pipeline,
}

impl Default for Callbacks {
    /// The standard CRUD chains.
    fn default() -> Self {
        let mut callbacks = Self::empty();
        crate::callbacks::register_defaults(&mut callbacks);
        callbacks
    }
}

impl Callbacks {
    /// Pipelines with no handlers at all.
    pub fn empty() -> Self {
        Self {
            creates: Pipeline::new(Operation::Create),
            updates: Pipeline::new(Operation::Update),
            deletes: Pipeline::new(Operation::Delete),
            queries: Pipeline::new(Operation::Query),
            row_queries: Pipeline::new(Operation::RowQuery),
        }
    }

    pub fn pipeline(&self, operation: Operation) -> &Pipeline {
        match operation {
            Operation::Create => &self.creates,
            Operation::Update => &self.updates,
            Operation::Delete => &self.deletes,
            Operation::Query => &self.queries,
            Operation::RowQuery => &self.row_queries,
        }
    }

    pub(crate) fn pipeline_mut(&mut self, operation: Operation) -> &mut Pipeline {
        match operation {
            Operation::Create => &mut self.creates,
            Operation::Update => &mut self.updates,
            Operation::Delete => &mut self.deletes,
            Operation::Query => &mut self.queries,
            Operation::RowQuery => &mut self.row_queries,
        }
    }

    pub fn registrar(&mut self, operation: Operation) -> Registrar<'_> {
        Registrar {
            pipeline: self.pipeline_mut(operation),
            before: None,
            after: None,
            cleanup: false,
        }
    }

    pub fn create(&mut self) -> Registrar<'_> {
        self.registrar(Operation::Create)
    }

    pub fn update(&mut self) -> Registrar<'_> {
        self.registrar(Operation::Update)
    }

    pub fn delete(&mut self) -> Registrar<'_> {
        self.registrar(Operation::Delete)
    }

    pub fn query(&mut self) -> Registrar<'_> {
        self.registrar(Operation::Query)
    }

    pub fn row_query(&mut self) -> Registrar<'_> {
        self.registrar(Operation::RowQuery)
    }
}
