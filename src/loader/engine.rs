//! Orchestration engine
//!
//! Drives load units from request to `Ready` or `Failed`.
//!
//! All work is expressed as jobs on a FIFO queue: hook calls, graph checks
//! and listener notifications. Fetches are the only futures; they sit in a
//! `FuturesUnordered` and turn back into jobs when they finish. Hooks and
//! listeners are always called with no `RefCell` borrow held, so they may
//! re-enter the loader freely; that includes fetch futures, which are taken
//! out of the engine while they are polled.
//!
//! A unit record lives only while its load is in progress. On `Ready` or
//! `Failed` it is dropped; what remains is the module in the registry and
//! the final state under the unit's name.
//!
//! ## Linking
//!
//! A unit waits in `LoadingDeps` until every unit reachable from it has been
//! parsed. The whole reachable set then becomes `Loaded`, and an eager unit
//! is linked and evaluated by a depth-first walk: dependencies first, and a
//! dependency that is already on the walk's stack is a circular edge that is
//! not waited for. Live bindings make such edges safe to link.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::Rc;

use futures::future::{poll_fn, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tracing::{debug, info, trace, warn};

use super::unit::{Dependency, LoadUnit, Milestone, UnitId, UnitKind, UnitState, Waiter};
use crate::error::{ErrorKind, LoadError};
use crate::hooks::{LoaderHooks, Metadata};
use crate::namespace::Module;
use crate::registry::Registry;
use crate::script::{parse_module, Intrinsics, ModuleInstance};

type FetchFuture = LocalBoxFuture<'static, (UnitId, anyhow::Result<String>)>;

const INLINE_PREFIX: &str = "@inline/";

enum Job {
    /// Call `locate` and start the fetch
    Locate(UnitId),
    /// Source arrived (or failed to): translate, instantiate, parse
    Translate(UnitId, anyhow::Result<String>),
    /// Look for units whose dependency graph is complete
    Advance,
    Deliver(Waiter, Result<Module, LoadError>),
}

impl Job {
    fn label(&self) -> &'static str {
        match self {
            Job::Locate(_) => "locate",
            Job::Translate(..) => "translate",
            Job::Advance => "advance",
            Job::Deliver(..) => "deliver",
        }
    }
}

/// Result of asking for a canonical name
enum Requested {
    /// A load in progress, new or shared
    Unit(UnitId),
    /// Already in the registry; no load needed
    Registered(Module),
}

#[derive(Default)]
struct EngineState {
    /// Units that have not reached a terminal state
    units: HashMap<UnitId, LoadUnit>,
    next_id: UnitId,
    /// Named units that have not reached a terminal state
    in_flight: HashMap<String, UnitId>,
    /// Every non-terminal unit, inline ones included, in creation order
    active: BTreeSet<UnitId>,
    /// Terminal state of the last load of each named unit
    settled: HashMap<String, UnitState>,
    jobs: VecDeque<Job>,
    advance_queued: bool,
    unhandled: VecDeque<LoadError>,
    inline_count: usize,
}

impl EngineState {
    /// Store a new unit and mark it in flight
    fn track(&mut self, unit: LoadUnit) -> UnitId {
        let id = self.next_id;
        self.next_id += 1;
        if unit.is_named() {
            self.in_flight.insert(unit.name.clone(), id);
        }
        self.active.insert(id);
        self.units.insert(id, unit);
        id
    }

    /// Remove a unit that reached `outcome`, keeping only its final state
    fn release(&mut self, id: UnitId, outcome: UnitState) -> Option<LoadUnit> {
        let mut unit = self.units.remove(&id)?;
        unit.state = outcome;
        if self.in_flight.get(&unit.name) == Some(&id) {
            self.in_flight.remove(&unit.name);
        }
        self.active.remove(&id);
        if unit.is_named() {
            self.settled.insert(unit.name.clone(), outcome);
        }
        Some(unit)
    }

    fn state_of(&self, id: UnitId) -> Option<UnitState> {
        self.units.get(&id).map(|unit| unit.state)
    }

    fn schedule_advance(&mut self) {
        if !self.advance_queued {
            self.advance_queued = true;
            self.jobs.push_back(Job::Advance);
        }
    }

    fn attach(&mut self, id: UnitId, waiter: Waiter) {
        match self.units.get_mut(&id) {
            Some(unit) => unit.waiters.push(waiter),
            None => warn!("Dropping listener for released unit {}", id),
        }
    }

    fn deliver_all(&mut self, waiters: Vec<Waiter>, outcome: &Result<Module, LoadError>) {
        for waiter in waiters {
            self.jobs.push_back(Job::Deliver(waiter, outcome.clone()));
        }
    }

    /// Units reachable from `root` that still need linking, or `None` while
    /// any of them is unparsed. Released units are ready and skipped.
    fn loaded_graph(&self, root: UnitId) -> Option<Vec<UnitId>> {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        let mut graph = Vec::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(unit) = self.units.get(&id) else {
                continue;
            };
            match unit.state {
                UnitState::LoadingDeps | UnitState::Loaded | UnitState::Linking => {}
                _ => return None,
            }
            graph.push(id);
            stack.extend(unit.dependencies.iter().filter_map(|dep| dep.unit));
        }
        Some(graph)
    }

    /// Post-order over the unevaluated graph below `root`
    fn evaluation_order(&self, root: UnitId) -> Vec<UnitId> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut order = Vec::new();
        self.visit(root, &mut visited, &mut on_stack, &mut order);
        order
    }

    fn visit(
        &self,
        id: UnitId,
        visited: &mut HashSet<UnitId>,
        on_stack: &mut HashSet<UnitId>,
        order: &mut Vec<UnitId>,
    ) {
        let Some(unit) = self.units.get(&id) else {
            return;
        };
        if !visited.insert(id) {
            return;
        }
        on_stack.insert(id);
        for dep in &unit.dependencies {
            let Some(dep_id) = dep.unit else {
                continue;
            };
            if on_stack.contains(&dep_id) {
                trace!("circular edge {} -> {}", unit.name, dep.name);
                continue;
            }
            self.visit(dep_id, visited, on_stack, order);
        }
        on_stack.remove(&id);
        order.push(id);
    }
}

/// Loader state shared by every `Loader` handle
pub(crate) struct Engine {
    hooks: Rc<dyn LoaderHooks>,
    registry: Registry,
    intrinsics: Intrinsics,
    state: RefCell<EngineState>,
    fetches: RefCell<FuturesUnordered<FetchFuture>>,
    /// Fetches currently taken out of `fetches` by a polling loop
    polled: Cell<usize>,
}

/// Fetches borrowed from the engine for one poll; returned on drop
struct PolledFetches<'a> {
    engine: &'a Engine,
    fetches: FuturesUnordered<FetchFuture>,
    counted: usize,
}

impl<'a> PolledFetches<'a> {
    fn take(engine: &'a Engine) -> Self {
        let fetches = std::mem::take(&mut *engine.fetches.borrow_mut());
        let counted = fetches.len();
        engine.polled.set(engine.polled.get() + counted);
        Self {
            engine,
            fetches,
            counted,
        }
    }
}

impl Drop for PolledFetches<'_> {
    fn drop(&mut self) {
        self.engine.polled.set(self.engine.polled.get() - self.counted);
        let remaining = std::mem::take(&mut self.fetches);
        self.engine.fetches.borrow_mut().extend(remaining);
    }
}

impl Engine {
    pub(crate) fn new(hooks: Rc<dyn LoaderHooks>, registry: Registry) -> Self {
        Self {
            hooks,
            registry,
            intrinsics: Intrinsics::default(),
            state: RefCell::new(EngineState::default()),
            fetches: RefCell::new(FuturesUnordered::new()),
            polled: Cell::new(0),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    pub(crate) fn normalize(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        referrer_address: Option<&str>,
    ) -> Result<String, LoadError> {
        self.hooks
            .normalize(specifier, referrer_name, referrer_address)
            .map_err(|e| LoadError::from_hook(ErrorKind::Normalization, specifier, e))
    }

    // Entry points

    pub(crate) fn import(
        &self,
        specifier: &str,
        referrer_name: Option<&str>,
        referrer_address: Option<&str>,
        metadata: Metadata,
        waiter: Waiter,
    ) {
        match self.normalize(specifier, referrer_name, referrer_address) {
            Ok(name) => match self.request(&name, true, metadata) {
                Requested::Unit(id) => self.state.borrow_mut().attach(id, waiter),
                Requested::Registered(module) => {
                    trace!("{} served from the registry", name);
                    self.state
                        .borrow_mut()
                        .jobs
                        .push_back(Job::Deliver(waiter, Ok(module)));
                }
            },
            Err(err) => {
                debug!("Import of '{}' rejected: {}", specifier, err);
                self.state
                    .borrow_mut()
                    .jobs
                    .push_back(Job::Deliver(waiter, Err(err)));
            }
        }
    }

    pub(crate) fn inline(
        &self,
        source: String,
        referrer_name: Option<String>,
        address: Option<String>,
        metadata: Metadata,
        waiter: Waiter,
    ) {
        let mut st = self.state.borrow_mut();
        let name = format!("{}{}", INLINE_PREFIX, st.inline_count);
        st.inline_count += 1;

        let mut unit = LoadUnit::new(&name, UnitKind::Inline, true);
        unit.referrer_name = referrer_name;
        unit.address = address;
        unit.metadata = metadata;
        unit.waiters.push(waiter);
        let id = st.track(unit);
        st.jobs.push_back(Job::Translate(id, Ok(source)));
        debug!("Loading inline module {}", name);
    }

    pub(crate) fn define(
        &self,
        name: &str,
        source: String,
        address: Option<String>,
        metadata: Metadata,
        waiter: Waiter,
    ) {
        let mut st = self.state.borrow_mut();
        if self.registry.contains(name) || st.in_flight.contains_key(name) {
            debug!("Refusing to redefine {}", name);
            let err = LoadError::AlreadyDefined {
                name: name.to_string(),
            };
            st.jobs.push_back(Job::Deliver(waiter, Err(err)));
            return;
        }

        let mut unit = LoadUnit::new(name, UnitKind::Defined, false);
        unit.address = address;
        unit.metadata = metadata;
        unit.waiters.push(waiter);
        let id = st.track(unit);
        st.jobs.push_back(Job::Translate(id, Ok(source)));
        debug!("Defining module {}", name);
    }

    /// Find or start the load of a canonical name
    ///
    /// In-flight units are reused, registered modules satisfy the request
    /// directly, and only otherwise is a new fetch started.
    fn request(&self, name: &str, eager: bool, metadata: Metadata) -> Requested {
        let mut st = self.state.borrow_mut();
        if let Some(&id) = st.in_flight.get(name) {
            if let Some(unit) = st.units.get_mut(&id) {
                if eager && !unit.eager {
                    debug!("Module {} requested for evaluation", name);
                    unit.eager = true;
                    st.schedule_advance();
                }
            }
            return Requested::Unit(id);
        }

        if let Some(module) = self.registry.get(name) {
            return Requested::Registered(module);
        }

        let mut unit = LoadUnit::new(name, UnitKind::Fetched, eager);
        unit.metadata = metadata;
        let id = st.track(unit);
        st.jobs.push_back(Job::Locate(id));
        debug!("Loading module {}", name);
        Requested::Unit(id)
    }

    // Driving

    pub(crate) async fn run_until_idle(&self) -> Result<(), LoadError> {
        loop {
            if let Some(err) = self.take_unhandled() {
                return Err(err);
            }
            while let Some(job) = self.next_job() {
                self.run_job(job);
                if let Some(err) = self.take_unhandled() {
                    return Err(err);
                }
            }

            if self.fetches.borrow().is_empty() {
                return Ok(());
            }
            match self.next_fetch().await {
                Some((id, result)) => self
                    .state
                    .borrow_mut()
                    .jobs
                    .push_back(Job::Translate(id, result)),
                None => return Ok(()),
            }
        }
    }

    /// Wait for one outstanding fetch without holding the `fetches` cell,
    /// so fetch futures can query or drive the loader themselves.
    async fn next_fetch(&self) -> Option<(UnitId, anyhow::Result<String>)> {
        let mut polled = PolledFetches::take(self);
        poll_fn(|cx| polled.fetches.poll_next_unpin(cx)).await
    }

    fn next_job(&self) -> Option<Job> {
        self.state.borrow_mut().jobs.pop_front()
    }

    fn take_unhandled(&self) -> Option<LoadError> {
        self.state.borrow_mut().unhandled.pop_front()
    }

    fn run_job(&self, job: Job) {
        trace!("job: {}", job.label());
        match job {
            Job::Locate(id) => self.locate(id),
            Job::Translate(id, fetched) => self.translate(id, fetched),
            Job::Advance => {
                self.state.borrow_mut().advance_queued = false;
                self.advance();
            }
            Job::Deliver(waiter, outcome) => {
                if let Some(err) = waiter.deliver(outcome) {
                    warn!("Unhandled load error: {}", err);
                    self.state.borrow_mut().unhandled.push_back(err);
                }
            }
        }
    }

    fn locate(&self, id: UnitId) {
        let request = {
            let st = self.state.borrow();
            match st.units.get(&id) {
                Some(unit) if unit.state == UnitState::Fetching => unit.request(),
                _ => return,
            }
        };

        let address = match self.hooks.locate(&request) {
            Ok(address) => address,
            Err(e) => {
                return self.fail(
                    id,
                    LoadError::from_hook(ErrorKind::Resolution, &request.name, e),
                )
            }
        };
        debug!("Located {} at {}", request.name, address);
        if let Some(unit) = self.state.borrow_mut().units.get_mut(&id) {
            unit.address = Some(address.clone());
        }

        let hooks = Rc::clone(&self.hooks);
        let request = request.with_address(address);
        self.fetches.borrow_mut().push(
            async move {
                let result = hooks.fetch(request).await;
                (id, result)
            }
            .boxed_local(),
        );
    }

    fn translate(&self, id: UnitId, fetched: anyhow::Result<String>) {
        let request = {
            let st = self.state.borrow();
            match st.units.get(&id) {
                Some(unit) if unit.state == UnitState::Fetching => unit.request(),
                _ => return,
            }
        };
        let name = request.name.clone();

        let source = match fetched {
            Ok(source) => source,
            Err(e) => return self.fail(id, LoadError::from_hook(ErrorKind::Fetch, &name, e)),
        };
        let source = match self.hooks.translate(&request, source) {
            Ok(source) => source,
            Err(e) => return self.fail(id, LoadError::from_hook(ErrorKind::Translate, &name, e)),
        };

        match self.hooks.instantiate(&request, &source) {
            Ok(Some(module)) => {
                debug!("Module {} supplied by instantiate hook", name);
                if let Some(unit) = self.state.borrow_mut().units.get_mut(&id) {
                    unit.module = Some(module);
                }
                self.mark_ready(id);
                self.state.borrow_mut().schedule_advance();
                return;
            }
            Ok(None) => {}
            Err(e) => {
                return self.fail(id, LoadError::from_hook(ErrorKind::Evaluation, &name, e))
            }
        }

        let record = match parse_module(&source) {
            Ok(record) => record,
            Err(e) => {
                return self.fail(
                    id,
                    LoadError::Parse {
                        name,
                        line: e.line,
                        column: e.column,
                        message: e.message,
                    },
                )
            }
        };
        let instance = Rc::new(ModuleInstance::new(&name, record, &self.intrinsics));
        let specifiers = instance.dependencies();

        let (referrer_name, referrer_address, eager) = {
            let mut st = self.state.borrow_mut();
            let Some(unit) = st.units.get_mut(&id) else {
                return;
            };
            unit.module = Some(instance.namespace().clone());
            unit.instance = Some(instance);
            unit.state = UnitState::Parsed;
            debug!("Parsed {} ({} dependencies)", name, specifiers.len());
            let referrer_name = match unit.kind {
                UnitKind::Inline => unit.referrer_name.clone(),
                UnitKind::Fetched | UnitKind::Defined => Some(unit.name.clone()),
            };
            (referrer_name, unit.address.clone(), unit.eager)
        };

        // Every specifier must resolve before any dependency load starts
        let mut resolved = Vec::with_capacity(specifiers.len());
        for specifier in specifiers {
            match self.normalize(
                &specifier,
                referrer_name.as_deref(),
                referrer_address.as_deref(),
            ) {
                Ok(dep_name) => resolved.push((specifier, dep_name)),
                Err(err) => return self.fail(id, err),
            }
        }

        let dependencies: Vec<Dependency> = resolved
            .into_iter()
            .map(|(specifier, name)| {
                let unit = match self.request(&name, eager, Metadata::Null) {
                    Requested::Unit(dep) => Some(dep),
                    Requested::Registered(_) => None,
                };
                Dependency {
                    specifier,
                    name,
                    unit,
                }
            })
            .collect();

        let mut st = self.state.borrow_mut();
        let Some(unit) = st.units.get_mut(&id) else {
            return;
        };
        unit.dependencies = dependencies;
        unit.state = UnitState::LoadingDeps;
        debug!("{} -> {}", name, UnitState::LoadingDeps);
        st.schedule_advance();
    }

    fn advance(&self) {
        let candidates: Vec<UnitId> = {
            let st = self.state.borrow();
            st.active.iter().copied().collect()
        };

        for id in candidates {
            let eager = {
                let mut st = self.state.borrow_mut();
                let Some(unit) = st.units.get(&id) else {
                    continue;
                };
                let eager = unit.eager;
                let waiting = unit.state == UnitState::LoadingDeps
                    || (unit.state == UnitState::Loaded && eager);
                if !waiting {
                    continue;
                }
                let Some(graph) = st.loaded_graph(id) else {
                    continue;
                };

                for member in graph {
                    let Some(unit) = st.units.get_mut(&member) else {
                        continue;
                    };
                    if unit.state != UnitState::LoadingDeps {
                        continue;
                    }
                    unit.state = UnitState::Loaded;
                    debug!("{} -> {}", unit.name, UnitState::Loaded);
                    let waiters = unit.take_waiters(Milestone::Loaded);
                    if let Some(module) = unit.module.clone() {
                        st.deliver_all(waiters, &Ok(module));
                    }
                }
                eager
            };

            if eager {
                let order = self.state.borrow().evaluation_order(id);
                for unit in order {
                    self.link_and_evaluate(unit);
                }
            }
        }
    }

    fn link_and_evaluate(&self, id: UnitId) {
        let (name, instance, imports) = {
            let mut st = self.state.borrow_mut();
            if st.state_of(id) != Some(UnitState::Loaded) {
                return;
            }
            let Some(unit) = st.units.get(&id) else {
                return;
            };
            // A dependency without a live unit has finished and is registered
            let imports: HashMap<String, Module> = unit
                .dependencies
                .iter()
                .filter_map(|dep| {
                    let module = match dep.unit.and_then(|dep_id| st.units.get(&dep_id)) {
                        Some(dep_unit) => dep_unit.module.clone(),
                        None => self.registry.get(&dep.name),
                    };
                    module.map(|module| (dep.specifier.clone(), module))
                })
                .collect();
            let name = unit.name.clone();
            let instance = unit.instance.clone();
            if let Some(unit) = st.units.get_mut(&id) {
                unit.state = UnitState::Linking;
            }
            debug!("{} -> {}", name, UnitState::Linking);
            (name, instance, imports)
        };

        let Some(instance) = instance else {
            return self.fail(
                id,
                LoadError::Link {
                    name,
                    message: "module was never instantiated".to_string(),
                },
            );
        };
        if let Err(err) = instance.link(|specifier| imports.get(specifier).cloned()) {
            return self.fail(id, err);
        }
        if let Err(err) = instance.evaluate() {
            return self.fail(id, err);
        }
        self.mark_ready(id);
    }

    fn mark_ready(&self, id: UnitId) {
        let unit = {
            let mut st = self.state.borrow_mut();
            let Some(mut unit) = st.release(id, UnitState::Ready) else {
                return;
            };
            let waiters = unit.take_waiters(Milestone::Ready);
            if let Some(module) = &unit.module {
                st.deliver_all(waiters, &Ok(module.clone()));
            }
            unit
        };

        if let (true, Some(module)) = (unit.is_named(), unit.module) {
            self.registry.set(&unit.name, module);
        }
        info!("Module {} ready", unit.name);
    }

    /// Fail a unit and, transitively, every unit waiting on it
    fn fail(&self, id: UnitId, err: LoadError) {
        let mut st = self.state.borrow_mut();
        let mut pending = VecDeque::from([(id, err)]);

        while let Some((id, err)) = pending.pop_front() {
            let Some(mut unit) = st.release(id, UnitState::Failed) else {
                continue;
            };
            warn!("Module {} failed: {}", unit.name, err);
            let waiters = unit.take_waiters(Milestone::Ready);
            st.deliver_all(waiters, &Err(err.clone()));

            let dependents: Vec<(UnitId, String)> = st
                .active
                .iter()
                .filter_map(|&other| {
                    let other_unit = st.units.get(&other)?;
                    other_unit
                        .dependencies
                        .iter()
                        .any(|dep| dep.unit == Some(id))
                        .then(|| (other, other_unit.name.clone()))
                })
                .collect();
            for (dependent, dependent_name) in dependents {
                let cause = LoadError::dependency(&dependent_name, &unit.name, err.clone());
                pending.push_back((dependent, cause));
            }
        }
    }

    // Introspection

    pub(crate) fn unit_state(&self, name: &str) -> Option<UnitState> {
        let st = self.state.borrow();
        if let Some(state) = st.in_flight.get(name).and_then(|&id| st.state_of(id)) {
            return Some(state);
        }
        if self.registry.contains(name) {
            return Some(UnitState::Ready);
        }
        st.settled.get(name).copied()
    }

    pub(crate) fn in_flight(&self) -> Vec<String> {
        let st = self.state.borrow();
        let mut names: Vec<String> = st.in_flight.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state.borrow().jobs.is_empty()
            && self.fetches.borrow().is_empty()
            && self.polled.get() == 0
    }
}
