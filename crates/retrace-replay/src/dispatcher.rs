//! The replay dispatcher state machine.
//!
//! ```text
//! Start -> Running -> { decode -> remap -> invoke live -> update tables } -> Ended
//!                 \-> Halted (fatal error, or a failure under FailurePolicy::Abort)
//! ```
//!
//! Records are replayed strictly in sequence order on the calling thread;
//! the object table and address map are owned by the dispatcher and never
//! shared.

use std::io::Read;

use retrace_core::{CallId, CaptureId, HandleCategory, LiveHandle, ResultCode, SequenceNumber};
use retrace_format::{CallRecord, TraceReader, Value};
use retrace_mapping::{GpuVaMap, MappingError, ObjectTable, Slot};
use smallvec::SmallVec;

use crate::config::{FailurePolicy, ReplayConfig};
use crate::error::ReplayError;
use crate::live::{LiveApi, LiveCall};
use crate::report::{DispatchOutcome, Divergence, ReplaySummary};
use crate::schema::{CallKind, CallSchema, SchemaRegistry};

/// Lifecycle state of a [`Dispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    /// No record dispatched yet.
    Start,
    /// Dispatching records.
    Running,
    /// [`Dispatcher::finish`] was called.
    Ended,
    /// A fatal error stopped the replay.
    Halted,
}

#[derive(Clone, Copy)]
struct RecordCtx {
    call_id: CallId,
    sequence: SequenceNumber,
}

impl RecordCtx {
    fn bad_argument(self, index: usize, expected: &'static str, found: &'static str) -> ReplayError {
        ReplayError::BadArgument {
            call_id: self.call_id,
            sequence: self.sequence,
            index,
            expected,
            found,
        }
    }

    fn unresolved(self, source: MappingError) -> ReplayError {
        ReplayError::Unresolved {
            call_id: self.call_id,
            sequence: self.sequence,
            source,
        }
    }

    fn mapping(self, source: MappingError) -> ReplayError {
        ReplayError::Mapping {
            call_id: self.call_id,
            sequence: self.sequence,
            source,
        }
    }

    fn arg<'v>(self, values: &'v [Value], index: usize) -> Result<&'v Value, ReplayError> {
        values
            .get(index)
            .ok_or_else(|| self.bad_argument(index, "argument", "nothing"))
    }

    fn handle(self, values: &[Value], index: usize) -> Result<(HandleCategory, CaptureId), ReplayError> {
        let v = self.arg(values, index)?;
        v.as_handle()
            .map(|(category, id)| (category, *id))
            .ok_or_else(|| self.bad_argument(index, "handle", v.kind_name()))
    }
}

/// Replays call records against a [`LiveApi`].
pub struct Dispatcher<L: LiveApi> {
    schemas: SchemaRegistry,
    live: L,
    config: ReplayConfig,
    objects: ObjectTable,
    addresses: GpuVaMap,
    state: DispatcherState,
    last_sequence: Option<SequenceNumber>,
    summary: ReplaySummary,
}

impl<L: LiveApi> Dispatcher<L> {
    /// A dispatcher in the [`Start`](DispatcherState::Start) state.
    pub fn new(schemas: SchemaRegistry, live: L, config: ReplayConfig) -> Result<Self, ReplayError> {
        config.validate()?;
        Ok(Self {
            schemas,
            live,
            config,
            objects: ObjectTable::new(),
            addresses: GpuVaMap::new(),
            state: DispatcherState::Start,
            last_sequence: None,
            summary: ReplaySummary::default(),
        })
    }

    /// Current state.
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Totals so far.
    pub fn summary(&self) -> &ReplaySummary {
        &self.summary
    }

    /// The capture-id to live-handle table.
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// The GPU virtual address map.
    pub fn addresses(&self) -> &GpuVaMap {
        &self.addresses
    }

    /// The live backend.
    pub fn live(&self) -> &L {
        &self.live
    }

    /// Consume the dispatcher and return the live backend.
    pub fn into_live(self) -> L {
        self.live
    }

    /// Replay every record of a trace, then [`finish`](Self::finish).
    pub fn run<R: Read>(&mut self, reader: TraceReader<R>) -> Result<ReplaySummary, ReplayError> {
        let metadata = &reader.header().metadata;
        tracing::info!(
            application = %metadata.application,
            api = %metadata.api,
            capabilities = ?reader.header().capabilities,
            "replay started"
        );
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(e) => return Err(self.halt(e.into())),
            };
            self.dispatch(&record)?;
        }
        Ok(self.finish())
    }

    /// End the replay and return the final totals.
    pub fn finish(&mut self) -> ReplaySummary {
        if self.state != DispatcherState::Halted {
            self.state = DispatcherState::Ended;
        }
        tracing::info!(
            state = ?self.state,
            dispatched = self.summary.dispatched,
            skipped = self.summary.skipped,
            divergences = self.summary.divergences.len(),
            "replay finished"
        );
        self.summary.clone()
    }

    /// Replay one record.
    pub fn dispatch(&mut self, record: &CallRecord) -> Result<DispatchOutcome, ReplayError> {
        match self.state {
            DispatcherState::Ended | DispatcherState::Halted => {
                return Err(ReplayError::NotRunning { state: self.state })
            }
            DispatcherState::Start => self.state = DispatcherState::Running,
            DispatcherState::Running => {}
        }

        if let Some(previous) = self.last_sequence {
            if record.sequence <= previous {
                return Err(self.halt(ReplayError::OutOfOrder {
                    call_id: record.call_id,
                    previous,
                    found: record.sequence,
                }));
            }
        }
        self.last_sequence = Some(record.sequence);

        match self.replay_record(record) {
            Ok(DispatchOutcome::Skipped) => {
                self.summary.skipped += 1;
                Ok(DispatchOutcome::Skipped)
            }
            Ok(outcome) => {
                self.summary.dispatched += 1;
                Ok(outcome)
            }
            Err(e) if e.is_record_local() && self.config.on_malformed_record == FailurePolicy::Continue => {
                tracing::warn!(
                    call_id = %record.call_id,
                    sequence = %record.sequence,
                    error = %e,
                    "skipping record"
                );
                self.summary.skipped += 1;
                Ok(DispatchOutcome::Skipped)
            }
            Err(e) => Err(self.halt(e)),
        }
    }

    fn halt(&mut self, error: ReplayError) -> ReplayError {
        self.state = DispatcherState::Halted;
        tracing::error!(%error, "replay halted");
        error
    }

    fn replay_record(&mut self, record: &CallRecord) -> Result<DispatchOutcome, ReplayError> {
        let ctx = RecordCtx {
            call_id: record.call_id,
            sequence: record.sequence,
        };
        let schema = *self.schemas.get(ctx.call_id).ok_or(ReplayError::UnknownCall {
            call_id: ctx.call_id,
            sequence: ctx.sequence,
        })?;
        let mut values = record.decode_values().map_err(|source| ReplayError::Malformed {
            call_id: ctx.call_id,
            sequence: ctx.sequence,
            source,
        })?;

        let captured = if schema.returns_code {
            let index = values.len().saturating_sub(1);
            let last = values
                .pop()
                .ok_or_else(|| ctx.bad_argument(index, "result code", "nothing"))?;
            Some(
                last.as_result_code()
                    .ok_or_else(|| ctx.bad_argument(index, "result code", last.kind_name()))?,
            )
        } else {
            None
        };

        tracing::debug!(
            call_id = %ctx.call_id,
            sequence = %ctx.sequence,
            name = schema.name,
            args = values.len(),
            "dispatching"
        );

        if let CallKind::Destroy { category, handle_arg } = schema.kind {
            let (_, id) = ctx.handle(&values, handle_arg)?;
            if self.objects.slot(category, id) == Some(Slot::Sentinel) {
                // Its creation already diverged; there is no live object.
                self.objects.unregister(category, id);
                tracing::debug!(%category, %id, "dropped sentinel without a live destroy");
                return Ok(DispatchOutcome::Skipped);
            }
        }

        let device = self.dispatch_device(&schema, &values);
        let args = self.remap_args(ctx, &schema, &values, device)?;
        let call = LiveCall {
            call_id: ctx.call_id,
            sequence: ctx.sequence,
            name: schema.name,
            args: &args,
        };

        let live_result = match schema.kind {
            CallKind::Invoke => self.live.invoke(&call),
            CallKind::Create {
                category,
                output_arg,
                parent_arg,
            } => {
                let output = ctx.arg(&values, output_arg)?;
                if !matches!(output, Value::Handle { .. } | Value::Array(_) | Value::Pointer(_)) {
                    return Err(ctx.bad_argument(output_arg, "handle or handle array", output.kind_name()));
                }
                let mut ids: SmallVec<[CaptureId; 4]> = SmallVec::new();
                output.for_each_handle(&mut |c, id| {
                    if c == category {
                        ids.push(*id);
                    }
                });
                let parent = match parent_arg.or(schema.dispatch_arg) {
                    Some(index) => Some(ctx.handle(&values, index)?),
                    // No declared parent: take the first argument of the
                    // category's dispatch parent, if any.
                    None => category.dispatch_parent().and_then(|wanted| {
                        values
                            .iter()
                            .filter_map(Value::as_handle)
                            .find(|(c, _)| *c == wanted)
                            .map(|(c, id)| (c, *id))
                    }),
                }
                .filter(|(_, id)| !id.is_null());

                // Reject duplicates before the live objects exist.
                for (i, id) in ids.iter().enumerate() {
                    if !id.is_null() && (self.objects.contains(category, *id) || ids[..i].contains(id)) {
                        return Err(ctx.mapping(MappingError::DuplicateHandle { category, id: *id }));
                    }
                }

                let created = self.live.create(&call, category, ids.len());
                let lives: SmallVec<[LiveHandle; 4]> = if created.handles.len() == ids.len() {
                    created.handles.iter().copied().collect()
                } else if created.result.is_success() {
                    return Err(ReplayError::OutputCountMismatch {
                        call_id: ctx.call_id,
                        sequence: ctx.sequence,
                        expected: ids.len(),
                        got: created.handles.len(),
                    });
                } else {
                    // Failed outright: every slot becomes a sentinel.
                    ids.iter().map(|_| LiveHandle::NULL).collect()
                };
                self.objects
                    .register_batch(category, &ids, &lives, parent)
                    .map_err(|e| ctx.mapping(e))?;
                created.result
            }
            CallKind::Destroy {
                category,
                handle_arg,
            } => {
                let (_, id) = ctx.handle(&values, handle_arg)?;
                let live = args[handle_arg]
                    .as_handle()
                    .map_or(LiveHandle::NULL, |(_, h)| *h);
                // Remapping already rejected a null or unknown id.
                let owner_device = self.objects.resolve_owner(category, id, HandleCategory::Device).ok();
                self.objects.unregister(category, id);
                if category == HandleCategory::Device {
                    self.addresses.remove_device(id);
                } else if let Some(device) = owner_device {
                    self.addresses.remove_owned_by(device, id);
                }
                self.live.destroy(&call, category, live)
            }
            CallKind::QueryAddress {
                owner_arg,
                size_arg,
                output_arg,
            } => {
                let (owner_category, owner) = ctx.handle(&values, owner_arg)?;
                let size_value = ctx.arg(&values, size_arg)?;
                let size = size_value
                    .as_u64()
                    .ok_or_else(|| ctx.bad_argument(size_arg, "size", size_value.kind_name()))?;
                let out_value = ctx.arg(&values, output_arg)?;
                let captured_address = out_value
                    .as_u64()
                    .ok_or_else(|| ctx.bad_argument(output_arg, "address", out_value.kind_name()))?;
                let device = self
                    .objects
                    .resolve_owner(owner_category, owner, HandleCategory::Device)
                    .map_err(|e| ctx.unresolved(e))?;
                let owner_live = args[owner_arg]
                    .as_handle()
                    .map_or(LiveHandle::NULL, |(_, h)| *h);

                let queried = self.live.query_address(&call, owner_live);
                if queried.result.is_success() && captured_address != 0 && size != 0 {
                    self.record_range(ctx, device, captured_address, size, queried.address, owner)?;
                }
                queried.result
            }
        };

        self.check_result(ctx, &schema, captured, live_result)
    }

    fn record_range(
        &mut self,
        ctx: RecordCtx,
        device: CaptureId,
        captured: u64,
        size: u64,
        live: u64,
        owner: CaptureId,
    ) -> Result<(), ReplayError> {
        if live == 0 {
            tracing::warn!(call_id = %ctx.call_id, %owner, "live address query returned null");
            return Ok(());
        }
        match self.addresses.range_containing(device, captured) {
            // Address queried again for the same allocation.
            Some(existing) if existing.owner == owner && existing.capture_base == captured => Ok(()),
            _ => self
                .addresses
                .add_range(device, captured, size, live, owner)
                .map_err(|e| ctx.mapping(e)),
        }
    }

    fn check_result(
        &mut self,
        ctx: RecordCtx,
        schema: &CallSchema,
        captured: Option<ResultCode>,
        live: ResultCode,
    ) -> Result<DispatchOutcome, ReplayError> {
        let diverged = !live.is_success() && captured.map_or(true, ResultCode::is_success);
        if !diverged {
            if captured.is_some_and(|c| c != live) {
                tracing::debug!(call_id = %ctx.call_id, sequence = %ctx.sequence, ?captured, %live, "result code differs");
            }
            return Ok(DispatchOutcome::Dispatched);
        }

        tracing::warn!(
            call_id = %ctx.call_id,
            sequence = %ctx.sequence,
            name = schema.name,
            ?captured,
            %live,
            "live call diverged from capture"
        );
        let failed = ReplayError::LiveCallFailed {
            call_id: ctx.call_id,
            sequence: ctx.sequence,
            name: schema.name,
            captured,
            live,
        };
        match self.config.on_live_failure {
            FailurePolicy::Abort => Err(failed),
            FailurePolicy::Continue => {
                self.summary.divergences.push(Divergence {
                    call_id: ctx.call_id,
                    sequence: ctx.sequence,
                    name: schema.name,
                    captured,
                    live,
                });
                match self.config.max_divergences {
                    Some(max) if self.summary.divergences.len() >= max => Err(failed),
                    _ => Ok(DispatchOutcome::Diverged),
                }
            }
        }
    }

    /// Device owning the call's dispatch handle, used to scope address
    /// translation.
    fn dispatch_device(&self, schema: &CallSchema, values: &[Value]) -> Option<CaptureId> {
        let (category, id) = values.get(schema.dispatch_arg?)?.as_handle()?;
        if id.is_null() {
            return None;
        }
        self.objects
            .resolve_owner(category, *id, HandleCategory::Device)
            .ok()
    }

    /// Capture handles become live handles. Null ids pass through as null
    /// only in arguments the schema does not mark as required.
    fn remap_args(
        &self,
        ctx: RecordCtx,
        schema: &CallSchema,
        values: &[Value],
        device: Option<CaptureId>,
    ) -> Result<Vec<Value<LiveHandle>>, ReplayError> {
        let objects = &self.objects;
        let addresses = &self.addresses;
        let output_arg = schema.output_arg();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let required = schema.is_required(i);
                let remapped = if Some(i) == output_arg {
                    // Written by the call; the live side gets null placeholders.
                    v.try_remap::<LiveHandle, MappingError, _, _>(
                        &mut |_, _: &CaptureId| Ok(LiveHandle::NULL),
                        &mut |_| Ok(0),
                    )
                } else {
                    v.try_remap::<LiveHandle, MappingError, _, _>(
                        &mut |category, id: &CaptureId| {
                            if required {
                                objects.lookup(category, *id)
                            } else {
                                objects.lookup_optional(category, *id)
                            }
                        },
                        &mut |address| Ok(device.map_or(address, |d| addresses.translate(d, address))),
                    )
                };
                remapped.map_err(|e| ctx.unresolved(e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{Created, QueriedAddress};
    use retrace_format::encode_payload;
    use smallvec::smallvec;

    const CREATE_DEVICE: CallId = CallId(1);
    const CREATE_BUFFERS: CallId = CallId(2);
    const BUFFER_ADDRESS: CallId = CallId(3);
    const USE: CallId = CallId(4);
    const DESTROY_BUFFER: CallId = CallId(5);

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                CREATE_DEVICE,
                CallSchema::create("CreateDevice", HandleCategory::Device, 0).returns_code(),
            )
            .with(
                CREATE_BUFFERS,
                CallSchema::create("CreateBuffers", HandleCategory::Buffer, 1)
                    .dispatch(0)
                    .returns_code(),
            )
            .with(BUFFER_ADDRESS, CallSchema::query_address("BufferAddress", 1, 2, 3).dispatch(0))
            .with(USE, CallSchema::invoke("Use").dispatch(0).returns_code())
            .with(
                DESTROY_BUFFER,
                CallSchema::destroy("DestroyBuffer", HandleCategory::Buffer, 1).dispatch(0),
            )
    }

    /// Hands out handles from 0x100 upward and addresses from 0x9000 upward.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<(&'static str, Vec<Value<LiveHandle>>)>,
        next_handle: u64,
        fail: Option<&'static str>,
    }

    impl Recorder {
        fn result(&self, call: &LiveCall<'_>) -> ResultCode {
            if self.fail == Some(call.name) {
                ResultCode(-2)
            } else {
                ResultCode::SUCCESS
            }
        }

        fn log(&mut self, call: &LiveCall<'_>) {
            self.calls.push((call.name, call.args.to_vec()));
        }
    }

    impl LiveApi for Recorder {
        fn invoke(&mut self, call: &LiveCall<'_>) -> ResultCode {
            self.log(call);
            self.result(call)
        }

        fn create(&mut self, call: &LiveCall<'_>, _: HandleCategory, count: usize) -> Created {
            self.log(call);
            let result = self.result(call);
            if !result.is_success() {
                return Created { result, handles: smallvec![] };
            }
            let handles = (0..count)
                .map(|_| {
                    self.next_handle += 1;
                    LiveHandle(0x100 + self.next_handle)
                })
                .collect();
            Created { result, handles }
        }

        fn destroy(&mut self, call: &LiveCall<'_>, _: HandleCategory, _: LiveHandle) -> ResultCode {
            self.log(call);
            self.result(call)
        }

        fn query_address(&mut self, call: &LiveCall<'_>, owner: LiveHandle) -> QueriedAddress {
            self.log(call);
            QueriedAddress {
                result: self.result(call),
                address: 0x9000 + (owner.0 << 12),
            }
        }
    }

    fn record(call_id: CallId, seq: u64, values: &[Value]) -> CallRecord {
        CallRecord {
            call_id,
            thread_id: retrace_core::ThreadId(1),
            sequence: SequenceNumber(seq),
            payload: encode_payload(values),
        }
    }

    fn dev(id: u64) -> Value {
        Value::handle(HandleCategory::Device, CaptureId(id))
    }

    fn buf(id: u64) -> Value {
        Value::handle(HandleCategory::Buffer, CaptureId(id))
    }

    fn ok() -> Value {
        Value::I32(0)
    }

    fn dispatcher(config: ReplayConfig) -> Dispatcher<Recorder> {
        Dispatcher::new(schemas(), Recorder::default(), config).unwrap()
    }

    fn setup(d: &mut Dispatcher<Recorder>) {
        d.dispatch(&record(CREATE_DEVICE, 1, &[dev(0xD), ok()])).unwrap();
        d.dispatch(&record(
            CREATE_BUFFERS,
            2,
            &[dev(0xD), Value::Array(Some(vec![buf(0xB1), buf(0xB2)])), ok()],
        ))
        .unwrap();
    }

    #[test]
    fn create_registers_outputs_in_order_with_parent() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        assert_eq!(d.state(), DispatcherState::Running);
        let objects = d.objects();
        assert_eq!(objects.lookup(HandleCategory::Device, CaptureId(0xD)), Ok(LiveHandle(0x101)));
        assert_eq!(objects.lookup(HandleCategory::Buffer, CaptureId(0xB1)), Ok(LiveHandle(0x102)));
        assert_eq!(objects.lookup(HandleCategory::Buffer, CaptureId(0xB2)), Ok(LiveHandle(0x103)));
        assert_eq!(
            objects.resolve_owner(HandleCategory::Buffer, CaptureId(0xB2), HandleCategory::Device),
            Ok(CaptureId(0xD))
        );
    }

    #[test]
    fn create_without_declared_parent_uses_dispatch_parent_category() {
        let schemas = schemas().with(
            CallId(9),
            CallSchema::create("CreateSampler", HandleCategory::Sampler, 1),
        );
        let mut d = Dispatcher::new(schemas, Recorder::default(), ReplayConfig::default()).unwrap();
        setup(&mut d);
        d.dispatch(&record(
            CallId(9),
            3,
            &[dev(0xD), Value::handle(HandleCategory::Sampler, CaptureId(0x5A))],
        ))
        .unwrap();
        assert_eq!(
            d.objects().parent(HandleCategory::Sampler, CaptureId(0x5A)),
            Ok(Some((HandleCategory::Device, CaptureId(0xD))))
        );
    }

    #[test]
    fn handles_and_addresses_are_remapped() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        // buffer 0xB1 lives at capture address 0x1000, 0x100 bytes.
        d.dispatch(&record(
            BUFFER_ADDRESS,
            3,
            &[dev(0xD), buf(0xB1), Value::U64(0x100), Value::Address(0x1000)],
        ))
        .unwrap();
        d.dispatch(&record(
            USE,
            4,
            &[dev(0xD), buf(0xB2), Value::Address(0x1040), Value::U64(0x1040), Value::Address(0x5000), ok()],
        ))
        .unwrap();

        let (name, args) = d.live().calls.last().unwrap();
        assert_eq!(*name, "Use");
        let live_b1 = 0x102u64;
        assert_eq!(
            args,
            &vec![
                Value::Handle { category: HandleCategory::Device, handle: LiveHandle(0x101) },
                Value::Handle { category: HandleCategory::Buffer, handle: LiveHandle(0x103) },
                Value::Address(0x9000 + (live_b1 << 12) + 0x40),
                // Plain integers are never translated.
                Value::U64(0x1040),
                Value::Address(0x5000),
            ]
        );
        assert!(d.summary().is_clean());
    }

    #[test]
    fn repeated_address_query_is_idempotent() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        let query = [dev(0xD), buf(0xB1), Value::U64(0x100), Value::Address(0x1000)];
        d.dispatch(&record(BUFFER_ADDRESS, 3, &query)).unwrap();
        d.dispatch(&record(BUFFER_ADDRESS, 4, &query)).unwrap();
        assert_eq!(d.addresses().range_count(CaptureId(0xD)), 1);
    }

    #[test]
    fn destroy_unregisters_and_drops_ranges() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        d.dispatch(&record(
            BUFFER_ADDRESS,
            3,
            &[dev(0xD), buf(0xB1), Value::U64(0x100), Value::Address(0x1000)],
        ))
        .unwrap();
        d.dispatch(&record(DESTROY_BUFFER, 4, &[dev(0xD), buf(0xB1)])).unwrap();

        let (name, args) = d.live().calls.last().unwrap();
        assert_eq!(*name, "DestroyBuffer");
        assert_eq!(
            args[1],
            Value::Handle { category: HandleCategory::Buffer, handle: LiveHandle(0x102) }
        );
        assert!(!d.objects().contains(HandleCategory::Buffer, CaptureId(0xB1)));
        assert_eq!(d.addresses().translate(CaptureId(0xD), 0x1040), 0x1040);

        let err = d.dispatch(&record(USE, 5, &[dev(0xD), buf(0xB1), ok()])).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Unresolved { source: MappingError::UnknownHandle { .. }, .. }
        ));
        assert_eq!(d.state(), DispatcherState::Halted);
    }

    #[test]
    fn null_optional_handle_passes_through() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        d.dispatch(&record(
            USE,
            3,
            &[dev(0xD), Value::handle(HandleCategory::Sampler, CaptureId::NULL), ok()],
        ))
        .unwrap();
        let (_, args) = d.live().calls.last().unwrap();
        assert_eq!(
            args[1],
            Value::Handle { category: HandleCategory::Sampler, handle: LiveHandle::NULL }
        );
    }

    #[test]
    fn null_dispatch_handle_is_unresolved() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        let calls_before = d.live().calls.len();
        let err = d.dispatch(&record(USE, 3, &[dev(0), ok()])).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Unresolved {
                source: MappingError::UnknownHandle { category: HandleCategory::Device, id: CaptureId::NULL },
                ..
            }
        ));
        assert_eq!(d.live().calls.len(), calls_before);
    }

    #[test]
    fn null_destroyed_handle_is_unresolved() {
        let mut d = dispatcher(ReplayConfig::best_effort());
        setup(&mut d);
        let calls_before = d.live().calls.len();
        let outcome = d.dispatch(&record(DESTROY_BUFFER, 3, &[dev(0xD), buf(0)])).unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert_eq!(d.live().calls.len(), calls_before);
        assert_eq!(d.objects().category_len(HandleCategory::Buffer), 2);
    }

    #[test]
    fn null_address_owner_is_unresolved() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        let err = d
            .dispatch(&record(
                BUFFER_ADDRESS,
                3,
                &[dev(0xD), buf(0), Value::U64(0x100), Value::Address(0x1000)],
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Unresolved { source: MappingError::UnknownHandle { category: HandleCategory::Buffer, .. }, .. }
        ));
        assert!(d.addresses().is_empty());
    }

    #[test]
    fn null_in_marked_argument_is_unresolved() {
        let schemas = schemas().with(CallId(9), CallSchema::invoke("Bind").dispatch(0).require(1));
        let mut d = Dispatcher::new(schemas, Recorder::default(), ReplayConfig::default()).unwrap();
        setup(&mut d);
        // Unmarked argument 2 may still be null.
        d.dispatch(&record(CallId(9), 3, &[dev(0xD), buf(0xB1), buf(0)])).unwrap();
        assert!(matches!(
            d.dispatch(&record(CallId(9), 4, &[dev(0xD), buf(0), buf(0xB1)])),
            Err(ReplayError::Unresolved { .. })
        ));
    }

    #[test]
    fn duplicate_create_fails_before_the_live_call() {
        let mut d = dispatcher(ReplayConfig::best_effort());
        setup(&mut d);
        let creates = |d: &Dispatcher<Recorder>| d.live().calls.iter().filter(|(n, _)| *n == "CreateBuffers").count();
        assert_eq!(creates(&d), 1);

        let err = d
            .dispatch(&record(
                CREATE_BUFFERS,
                3,
                &[dev(0xD), Value::Array(Some(vec![buf(0xB3), buf(0xB2)])), ok()],
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            ReplayError::Mapping { source: MappingError::DuplicateHandle { id: CaptureId(0xB2), .. }, .. }
        ));
        assert_eq!(creates(&d), 1);
        assert!(!d.objects().contains(HandleCategory::Buffer, CaptureId(0xB3)));
    }

    #[test]
    fn out_of_order_halts() {
        let mut d = dispatcher(ReplayConfig::best_effort());
        setup(&mut d);
        let err = d.dispatch(&record(USE, 2, &[dev(0xD), ok()])).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::OutOfOrder { previous: SequenceNumber(2), found: SequenceNumber(2), .. }
        ));
        assert!(matches!(
            d.dispatch(&record(USE, 9, &[dev(0xD), ok()])),
            Err(ReplayError::NotRunning { state: DispatcherState::Halted })
        ));
    }

    #[test]
    fn live_failure_aborts_by_default() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        d.live.fail = Some("Use");
        let err = d.dispatch(&record(USE, 3, &[dev(0xD), ok()])).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::LiveCallFailed { live: ResultCode(-2), captured: Some(ResultCode(0)), .. }
        ));
        assert_eq!(d.state(), DispatcherState::Halted);
    }

    #[test]
    fn captured_failure_is_not_a_divergence() {
        let mut d = dispatcher(ReplayConfig::default());
        setup(&mut d);
        d.live.fail = Some("Use");
        let outcome = d
            .dispatch(&record(USE, 3, &[dev(0xD), Value::I32(-2)]))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched);
    }

    #[test]
    fn failed_create_under_continue_registers_sentinels() {
        let mut d = dispatcher(ReplayConfig::best_effort());
        d.dispatch(&record(CREATE_DEVICE, 1, &[dev(0xD), ok()])).unwrap();
        d.live.fail = Some("CreateBuffers");
        let outcome = d
            .dispatch(&record(
                CREATE_BUFFERS,
                2,
                &[dev(0xD), Value::Array(Some(vec![buf(0xB1), buf(0xB2)])), ok()],
            ))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Diverged);
        assert_eq!(d.objects().slot(HandleCategory::Buffer, CaptureId(0xB2)), Some(Slot::Sentinel));

        d.live.fail = None;
        // Using a sentinel is an explicit, skippable error.
        let outcome = d.dispatch(&record(USE, 3, &[dev(0xD), buf(0xB1), ok()])).unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);

        // Destroying a sentinel just drops it.
        let outcome = d.dispatch(&record(DESTROY_BUFFER, 4, &[dev(0xD), buf(0xB2)])).unwrap();
        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(!d.objects().contains(HandleCategory::Buffer, CaptureId(0xB2)));

        let summary = d.finish();
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.divergences.len(), 1);
        assert_eq!(summary.divergences[0].name, "CreateBuffers");
        assert_eq!(d.state(), DispatcherState::Ended);
    }

    #[test]
    fn divergence_cap_halts() {
        let config = ReplayConfig {
            max_divergences: Some(2),
            ..ReplayConfig::best_effort()
        };
        let mut d = dispatcher(config);
        setup(&mut d);
        d.live.fail = Some("Use");
        assert_eq!(
            d.dispatch(&record(USE, 3, &[dev(0xD), ok()])).unwrap(),
            DispatchOutcome::Diverged
        );
        assert!(d.dispatch(&record(USE, 4, &[dev(0xD), ok()])).is_err());
        assert_eq!(d.state(), DispatcherState::Halted);
    }

    #[test]
    fn malformed_records_follow_policy() {
        let mut d = dispatcher(ReplayConfig::best_effort());
        setup(&mut d);
        let mut bad = record(USE, 3, &[dev(0xD), ok()]);
        bad.payload.push(0xFF);
        assert_eq!(d.dispatch(&bad).unwrap(), DispatchOutcome::Skipped);
        assert_eq!(
            d.dispatch(&record(CallId(999), 4, &[])).unwrap(),
            DispatchOutcome::Skipped
        );
        assert_eq!(
            d.dispatch(&record(USE, 5, &[dev(0xD), Value::Str(None)])).unwrap(),
            DispatchOutcome::Skipped
        );

        let mut strict = dispatcher(ReplayConfig::default());
        assert!(matches!(
            strict.dispatch(&record(CallId(999), 1, &[])),
            Err(ReplayError::UnknownCall { .. })
        ));
    }

    #[test]
    fn output_count_mismatch_is_fatal() {
        struct Short;
        impl LiveApi for Short {
            fn invoke(&mut self, _: &LiveCall<'_>) -> ResultCode {
                ResultCode::SUCCESS
            }
            fn create(&mut self, _: &LiveCall<'_>, _: HandleCategory, _: usize) -> Created {
                Created { result: ResultCode::SUCCESS, handles: smallvec![LiveHandle(1)] }
            }
            fn destroy(&mut self, _: &LiveCall<'_>, _: HandleCategory, _: LiveHandle) -> ResultCode {
                ResultCode::SUCCESS
            }
            fn query_address(&mut self, _: &LiveCall<'_>, _: LiveHandle) -> QueriedAddress {
                QueriedAddress { result: ResultCode::SUCCESS, address: 0 }
            }
        }

        let mut d = Dispatcher::new(schemas(), Short, ReplayConfig::best_effort()).unwrap();
        d.dispatch(&record(CREATE_DEVICE, 1, &[dev(0xD), ok()])).unwrap();
        let err = d
            .dispatch(&record(
                CREATE_BUFFERS,
                2,
                &[dev(0xD), Value::Array(Some(vec![buf(1), buf(2)])), ok()],
            ))
            .unwrap_err();
        assert!(matches!(err, ReplayError::OutputCountMismatch { expected: 2, got: 1, .. }));
    }
}
