//! A small Vulkan-shaped API used across the test suites.
//!
//! - [`sample_schemas`]: replay schemas for the entry points in [`calls`].
//! - [`FakeDriver`]: the capture-time "native" side, handing out native
//!   handles and device addresses.
//! - [`SampleWorkload`]: a scripted frame (instance, device, buffers with
//!   device addresses, a pipeline batch, command recording, teardown)
//!   captured into a session.

use std::io::Write;

use retrace_capture::{CallEncoder, CaptureError, CaptureSession};
use retrace_core::{CallId, HandleCategory, ResultCode};
use retrace_format::{StructValue, Value};
use retrace_replay::{CallSchema, SchemaRegistry};

/// Entry point ids.
pub mod calls {
    use retrace_core::CallId;

    pub const CREATE_INSTANCE: CallId = CallId(1);
    pub const ENUMERATE_PHYSICAL_DEVICES: CallId = CallId(2);
    pub const CREATE_DEVICE: CallId = CallId(3);
    pub const CREATE_BUFFER: CallId = CallId(4);
    pub const GET_BUFFER_DEVICE_ADDRESS: CallId = CallId(5);
    pub const CREATE_GRAPHICS_PIPELINES: CallId = CallId(6);
    pub const CREATE_COMMAND_POOL: CallId = CallId(7);
    pub const ALLOCATE_COMMAND_BUFFERS: CallId = CallId(8);
    pub const CMD_BIND_PIPELINE: CallId = CallId(9);
    pub const CMD_PUSH_ADDRESS: CallId = CallId(10);
    pub const CMD_DRAW: CallId = CallId(11);
    pub const QUEUE_SUBMIT: CallId = CallId(12);
    pub const DESTROY_PIPELINE: CallId = CallId(13);
    pub const DESTROY_BUFFER: CallId = CallId(14);
    pub const DESTROY_COMMAND_POOL: CallId = CallId(15);
    pub const DESTROY_DEVICE: CallId = CallId(16);
    pub const DESTROY_INSTANCE: CallId = CallId(17);
}

/// Structure type tags.
pub mod tags {
    pub const DEVICE_CREATE_INFO: u32 = 3;
    pub const DEVICE_FEATURES: u32 = 1_000_059_000;
    pub const BUFFER_CREATE_INFO: u32 = 12;
    pub const GRAPHICS_PIPELINE_CREATE_INFO: u32 = 28;
    pub const PUSH_ADDRESS_INFO: u32 = 1_000_257_000;
}

/// Replay schemas for every entry point in [`calls`].
///
/// Argument layouts, with `->` marking outputs:
///
/// | call | arguments |
/// |------|-----------|
/// | `CREATE_INSTANCE` | app name, -> instance, result |
/// | `ENUMERATE_PHYSICAL_DEVICES` | instance, -> physical devices, result |
/// | `CREATE_DEVICE` | physical device, create info, -> device, result |
/// | `CREATE_BUFFER` | device, create info, -> buffer, result |
/// | `GET_BUFFER_DEVICE_ADDRESS` | device, buffer, size, -> address |
/// | `CREATE_GRAPHICS_PIPELINES` | device, create infos, -> pipelines, result |
/// | `CREATE_COMMAND_POOL` | device, -> pool, result |
/// | `ALLOCATE_COMMAND_BUFFERS` | device, pool, -> command buffers, result |
/// | `CMD_BIND_PIPELINE` | command buffer, bind point, pipeline |
/// | `CMD_PUSH_ADDRESS` | command buffer, struct of addresses |
/// | `CMD_DRAW` | command buffer, vertex count, instance count |
/// | `QUEUE_SUBMIT` | device, command buffers, result |
/// | `DESTROY_*` | device, object (device and instance: the object alone) |
pub fn sample_schemas() -> SchemaRegistry {
    use calls::*;
    use HandleCategory as C;

    SchemaRegistry::new()
        .with(
            CREATE_INSTANCE,
            CallSchema::create("vkCreateInstance", C::Instance, 1).returns_code(),
        )
        .with(
            ENUMERATE_PHYSICAL_DEVICES,
            CallSchema::create("vkEnumeratePhysicalDevices", C::PhysicalDevice, 1)
                .dispatch(0)
                .returns_code(),
        )
        .with(
            CREATE_DEVICE,
            CallSchema::create("vkCreateDevice", C::Device, 2)
                .dispatch(0)
                .returns_code(),
        )
        .with(
            CREATE_BUFFER,
            CallSchema::create("vkCreateBuffer", C::Buffer, 2)
                .dispatch(0)
                .returns_code(),
        )
        .with(
            GET_BUFFER_DEVICE_ADDRESS,
            CallSchema::query_address("vkGetBufferDeviceAddress", 1, 2, 3).dispatch(0),
        )
        .with(
            CREATE_GRAPHICS_PIPELINES,
            CallSchema::create("vkCreateGraphicsPipelines", C::Pipeline, 2)
                .dispatch(0)
                .returns_code(),
        )
        .with(
            CREATE_COMMAND_POOL,
            CallSchema::create("vkCreateCommandPool", C::CommandPool, 1)
                .dispatch(0)
                .returns_code(),
        )
        .with(
            ALLOCATE_COMMAND_BUFFERS,
            CallSchema::create("vkAllocateCommandBuffers", C::CommandBuffer, 2)
                .dispatch(0)
                .parent(1)
                .returns_code(),
        )
        .with(CMD_BIND_PIPELINE, CallSchema::invoke("vkCmdBindPipeline").dispatch(0))
        .with(CMD_PUSH_ADDRESS, CallSchema::invoke("vkCmdPushConstants").dispatch(0))
        .with(CMD_DRAW, CallSchema::invoke("vkCmdDraw").dispatch(0))
        .with(
            QUEUE_SUBMIT,
            CallSchema::invoke("vkQueueSubmit").dispatch(0).returns_code(),
        )
        .with(
            DESTROY_PIPELINE,
            CallSchema::destroy("vkDestroyPipeline", C::Pipeline, 1).dispatch(0),
        )
        .with(
            DESTROY_BUFFER,
            CallSchema::destroy("vkDestroyBuffer", C::Buffer, 1).dispatch(0),
        )
        .with(
            DESTROY_COMMAND_POOL,
            CallSchema::destroy("vkDestroyCommandPool", C::CommandPool, 1).dispatch(0),
        )
        .with(
            DESTROY_DEVICE,
            CallSchema::destroy("vkDestroyDevice", C::Device, 0).dispatch(0),
        )
        .with(
            DESTROY_INSTANCE,
            CallSchema::destroy("vkDestroyInstance", C::Instance, 0).dispatch(0),
        )
}

/// Capture-time native side: sequential handles and page-aligned
/// device addresses, far from anything [`MockLiveApi`](crate::MockLiveApi)
/// hands out.
pub struct FakeDriver {
    next_handle: u64,
    next_address: u64,
}

impl FakeDriver {
    pub const HANDLE_BASE: u64 = 0x5500_0000_0000;
    pub const ADDRESS_BASE: u64 = 0x0000_1000_0000_0000;

    pub fn new() -> Self {
        Self {
            next_handle: Self::HANDLE_BASE,
            next_address: Self::ADDRESS_BASE,
        }
    }

    pub fn handle(&mut self) -> u64 {
        self.next_handle += 0x10;
        self.next_handle
    }

    /// Allocate `size` bytes of device address space.
    pub fn address(&mut self, size: u64) -> u64 {
        let a = self.next_address;
        self.next_address += size.next_multiple_of(0x1_0000);
        a
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// A scripted frame captured through a [`CaptureSession`].
#[derive(Clone, Debug)]
pub struct SampleWorkload {
    /// Pipelines created in one batch call.
    pub pipelines: usize,
    /// Draws recorded into the command buffer.
    pub draws: usize,
    /// Size of each of the two buffers.
    pub buffer_size: u64,
}

impl Default for SampleWorkload {
    fn default() -> Self {
        Self {
            pipelines: 3,
            draws: 4,
            buffer_size: 0x1000,
        }
    }
}

const OK: ResultCode = ResultCode::SUCCESS;

/// Encode one call. Returns whether a record was appended.
fn record<W, F>(
    session: &CaptureSession<W>,
    call_id: CallId,
    lifetime: bool,
    encode: F,
) -> Result<bool, CaptureError>
where
    W: Write + Send,
    F: FnOnce(&mut CallEncoder<'_, W>) -> Result<(), CaptureError>,
{
    let encoder = if lifetime {
        session.begin_lifetime(call_id)
    } else {
        session.begin(call_id)
    };
    let Some(mut encoder) = encoder else {
        return Ok(false);
    };
    encode(&mut encoder)?;
    encoder.end()?;
    Ok(true)
}

impl SampleWorkload {
    /// Byte offset into the first buffer pushed by draw `i`.
    pub fn push_offset(&self, i: usize) -> u64 {
        (i as u64 * 0x40) % self.buffer_size
    }

    /// Run the frame against `driver`, capturing into `session`.
    ///
    /// Returns the number of records appended.
    pub fn capture<W: Write + Send>(
        &self,
        session: &CaptureSession<W>,
        driver: &mut FakeDriver,
    ) -> Result<u64, CaptureError> {
        use calls::*;
        use HandleCategory as C;

        let mut appended = 0u64;
        let mut count = |r: bool| appended += u64::from(r);

        let instance = driver.handle();
        count(record(session, CREATE_INSTANCE, true, |e| {
            e.encode_str(Some("sample-workload"));
            e.encode_new_handle(C::Instance, instance)?;
            e.encode_result(OK);
            Ok(())
        })?);

        let physical = driver.handle();
        count(record(session, ENUMERATE_PHYSICAL_DEVICES, true, |e| {
            e.encode_handle(C::Instance, instance);
            e.encode_new_handles(C::PhysicalDevice, &[physical])?;
            e.encode_result(OK);
            Ok(())
        })?);

        let device = driver.handle();
        count(record(session, CREATE_DEVICE, true, |e| {
            e.encode_handle(C::PhysicalDevice, physical);
            e.encode_struct(
                StructValue::new(tags::DEVICE_CREATE_INFO, vec![Value::U32(1)])
                    .with_link(tags::DEVICE_FEATURES, vec![Value::Bool(true)]),
            );
            e.encode_new_handle(C::Device, device)?;
            e.encode_result(OK);
            Ok(())
        })?);

        let mut buffers = Vec::with_capacity(2);
        for usage in [0x20u32, 0x80] {
            let buffer = driver.handle();
            count(record(session, CREATE_BUFFER, true, |e| {
                e.encode_handle(C::Device, device);
                e.encode_struct(StructValue::new(
                    tags::BUFFER_CREATE_INFO,
                    vec![
                        Value::U64(self.buffer_size),
                        Value::U32(usage),
                    ],
                ));
                e.encode_new_handle(C::Buffer, buffer)?;
                e.encode_result(OK);
                Ok(())
            })?);

            let address = driver.address(self.buffer_size);
            count(record(session, GET_BUFFER_DEVICE_ADDRESS, false, |e| {
                e.encode_handle(C::Device, device)
                    .encode_handle(C::Buffer, buffer)
                    .encode_u64(self.buffer_size)
                    .encode_address(address);
                Ok(())
            })?);
            buffers.push((buffer, address));
        }

        let pipelines: Vec<u64> = (0..self.pipelines).map(|_| driver.handle()).collect();
        count(record(session, CREATE_GRAPHICS_PIPELINES, true, |e| {
            e.encode_handle(C::Device, device);
            e.encode_value(&Value::Array(Some(
                (0..self.pipelines)
                    .map(|i| {
                        Value::Struct(StructValue::new(
                            tags::GRAPHICS_PIPELINE_CREATE_INFO,
                            vec![Value::U32(i as u32)],
                        ))
                    })
                    .collect(),
            )));
            e.encode_new_handles(C::Pipeline, &pipelines)?;
            e.encode_result(OK);
            Ok(())
        })?);

        let pool = driver.handle();
        count(record(session, CREATE_COMMAND_POOL, true, |e| {
            e.encode_handle(C::Device, device);
            e.encode_new_handle(C::CommandPool, pool)?;
            e.encode_result(OK);
            Ok(())
        })?);

        let cmd = driver.handle();
        count(record(session, ALLOCATE_COMMAND_BUFFERS, true, |e| {
            e.encode_handle(C::Device, device)
                .encode_handle(C::CommandPool, pool);
            e.encode_new_handles(C::CommandBuffer, &[cmd])?;
            e.encode_result(OK);
            Ok(())
        })?);

        for draw in 0..self.draws {
            let pipeline = pipelines.get(draw % self.pipelines.max(1)).copied().unwrap_or(0);
            count(record(session, CMD_BIND_PIPELINE, false, |e| {
                e.encode_handle(C::CommandBuffer, cmd)
                    .encode_u32(0)
                    .encode_handle(C::Pipeline, pipeline);
                Ok(())
            })?);
            count(record(session, CMD_PUSH_ADDRESS, false, |e| {
                e.encode_handle(C::CommandBuffer, cmd);
                e.encode_struct(StructValue::new(
                    tags::PUSH_ADDRESS_INFO,
                    vec![
                        Value::Address(buffers[0].1 + self.push_offset(draw)),
                        Value::Address(buffers[1].1),
                    ],
                ));
                Ok(())
            })?);
            count(record(session, CMD_DRAW, false, |e| {
                e.encode_handle(C::CommandBuffer, cmd)
                    .encode_u32(3)
                    .encode_u32(1);
                Ok(())
            })?);
        }

        count(record(session, QUEUE_SUBMIT, false, |e| {
            e.encode_handle(C::Device, device)
                .encode_handles(C::CommandBuffer, &[cmd])
                .encode_result(OK);
            Ok(())
        })?);

        for &pipeline in &pipelines {
            count(record(session, DESTROY_PIPELINE, true, |e| {
                e.encode_handle(C::Device, device);
                e.encode_destroyed_handle(C::Pipeline, pipeline)?;
                Ok(())
            })?);
        }
        for &(buffer, _) in &buffers {
            count(record(session, DESTROY_BUFFER, true, |e| {
                e.encode_handle(C::Device, device);
                e.encode_destroyed_handle(C::Buffer, buffer)?;
                Ok(())
            })?);
        }
        count(record(session, DESTROY_COMMAND_POOL, true, |e| {
            e.encode_handle(C::Device, device);
            e.encode_destroyed_handle(C::CommandPool, pool)?;
            Ok(())
        })?);
        count(record(session, DESTROY_DEVICE, true, |e| {
            e.encode_destroyed_handle(C::Device, device)?;
            Ok(())
        })?);
        count(record(session, DESTROY_INSTANCE, true, |e| {
            e.encode_destroyed_handle(C::Instance, instance)?;
            Ok(())
        })?);

        Ok(appended)
    }
}
