//! Process-scoped loopback capture.
//!
//! Activates `VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK` for one process tree
//! and hands the core a capture client that reads packets in shared mode.
//!
//! ## Requirements
//! - Windows 10 1803 (build 17134) or newer
//! - Usually an elevated host process; denial is reported as `AccessDenied`
//! - One capture per target: a second activation on the same process fails
//!   with `ConcurrentCapture`

use std::mem::ManuallyDrop;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use windows::core::{implement, Interface, Ref, HRESULT, IUnknown};
use windows::Win32::Media::Audio::{
    ActivateAudioInterfaceAsync, IActivateAudioInterfaceAsyncOperation,
    IActivateAudioInterfaceCompletionHandler, IActivateAudioInterfaceCompletionHandler_Impl,
    IAudioCaptureClient, IAudioClient, AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_SHAREMODE_SHARED,
    AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_LOOPBACK, AUDIOCLIENT_ACTIVATION_PARAMS,
    AUDIOCLIENT_ACTIVATION_PARAMS_0, AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
    AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS, PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
    VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
};
use windows::Win32::System::Com::StructuredStorage::{
    PROPVARIANT, PROPVARIANT_0, PROPVARIANT_0_0, PROPVARIANT_0_0_0,
};
use windows::Win32::System::Com::{CoTaskMemFree, BLOB};
use windows::Win32::System::Variant::VT_BLOB;

use audio_bridge_core::{
    ActivationError, ActivationFailure, CaptureClient, CapturedPacket, DeviceError,
    FormatDescriptor, LoopbackActivation, LoopbackActivator, PrivilegeLevel,
};

use crate::com::{device_error, process_image_name, ComScope, MmcssRegistration, MtaUsage};
use crate::device_host::activation_error;
use crate::diagnostics::{self, supports_process_loopback};
use crate::session_directory::TargetSessionProbe;
use crate::wave_format::{descriptor_from_wave, float_format};

/// Shared-mode buffer requested at initialization: 100 ms.
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// Format used when the virtual device does not report a mix format.
const FALLBACK_CHANNELS: u16 = 2;
const FALLBACK_SAMPLE_RATE: u32 = 48_000;

#[implement(IActivateAudioInterfaceCompletionHandler)]
struct ActivationHandler {
    done: Sender<()>,
}

impl IActivateAudioInterfaceCompletionHandler_Impl for ActivationHandler_Impl {
    fn ActivateCompleted(
        &self,
        _operation: Ref<'_, IActivateAudioInterfaceAsyncOperation>,
    ) -> windows::core::Result<()> {
        let _ = self.done.try_send(());
        Ok(())
    }
}

/// Activator for per-process loopback capture.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLoopbackActivator;

impl ProcessLoopbackActivator {
    pub fn new() -> Self {
        Self
    }

    /// Run the asynchronous activation and wait for its completion.
    unsafe fn activate_client(
        &self,
        process_id: u32,
        timeout: Duration,
    ) -> Result<IAudioClient, ActivationError> {
        let params = AUDIOCLIENT_ACTIVATION_PARAMS {
            ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
            Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
                ProcessLoopbackParams: AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
                    TargetProcessId: process_id,
                    ProcessLoopbackMode: PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
                },
            },
        };
        // The blob borrows `params`; neither may be dropped by PROPVARIANT.
        let prop = ManuallyDrop::new(PROPVARIANT {
            Anonymous: PROPVARIANT_0 {
                Anonymous: ManuallyDrop::new(PROPVARIANT_0_0 {
                    vt: VT_BLOB,
                    wReserved1: 0,
                    wReserved2: 0,
                    wReserved3: 0,
                    Anonymous: PROPVARIANT_0_0_0 {
                        blob: BLOB {
                            cbSize: std::mem::size_of::<AUDIOCLIENT_ACTIVATION_PARAMS>() as u32,
                            pBlobData: &params as *const AUDIOCLIENT_ACTIVATION_PARAMS as *mut u8,
                        },
                    },
                }),
            },
        });

        let (done_tx, done_rx) = bounded(1);
        let handler: IActivateAudioInterfaceCompletionHandler =
            ActivationHandler { done: done_tx }.into();
        let operation = ActivateAudioInterfaceAsync(
            VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK,
            &IAudioClient::IID,
            Some(&*prop as *const PROPVARIANT),
            &handler,
        )
        .map_err(|e| activation_error("ActivateAudioInterfaceAsync", e))?;

        if done_rx.recv_timeout(timeout).is_err() {
            log::error!(
                "process loopback activation for pid {} timed out after {:?}",
                process_id,
                timeout
            );
            return Err(ActivationError::new(
                ActivationFailure::Timeout,
                format!("activation did not complete within {:?}", timeout),
            ));
        }

        let mut result = HRESULT::default();
        let mut activated: Option<IUnknown> = None;
        operation
            .GetActivateResult(&mut result, &mut activated)
            .map_err(|e| activation_error("GetActivateResult", e))?;
        result
            .ok()
            .map_err(|e| activation_error("process loopback activation", e))?;
        let activated = activated.ok_or_else(|| {
            ActivationError::new(
                ActivationFailure::TargetNotPlaying,
                "activation returned no client; the target may not be playing audio",
            )
        })?;
        activated.cast().map_err(|e| activation_error("IAudioClient cast", e))
    }

    unsafe fn initialize(client: &IAudioClient) -> Result<FormatDescriptor, ActivationError> {
        // The virtual device usually has no mix format of its own; the engine
        // converts to whatever we ask for under AUTOCONVERTPCM.
        let fallback = float_format(FALLBACK_CHANNELS, FALLBACK_SAMPLE_RATE);
        let (format, owned) = match client.GetMixFormat() {
            Ok(format) => (format as *const _, Some(format)),
            Err(e) => {
                log::debug!("process loopback mix format unavailable ({}), using float stereo", e);
                (&fallback as *const _, None)
            }
        };

        let descriptor = descriptor_from_wave(format);
        let initialized = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_LOOPBACK | AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM,
            BUFFER_DURATION_HNS,
            0,
            format,
            None,
        );
        if let Some(owned) = owned {
            CoTaskMemFree(Some(owned as *const _));
        }
        initialized.map_err(|e| activation_error("IAudioClient::Initialize", e))?;
        Ok(descriptor)
    }
}

impl LoopbackActivator for ProcessLoopbackActivator {
    fn activate(
        &self,
        process_id: u32,
        timeout: Duration,
    ) -> Result<LoopbackActivation, ActivationError> {
        let diagnostics = diagnostics::collect();
        let target = process_image_name(process_id).unwrap_or_else(|| "<unknown>".into());
        log::info!(
            "activating process loopback for {} (pid {}), privilege {:?}, os {}",
            target,
            process_id,
            diagnostics.privilege,
            diagnostics
                .os_version
                .map_or_else(|| "unknown".to_string(), |v| v.to_string())
        );

        if let Some(version) = diagnostics.os_version {
            if !supports_process_loopback(version) {
                return Err(ActivationError::new(
                    ActivationFailure::UnsupportedOs,
                    format!("process loopback needs build 17134 or newer, found {}", version),
                )
                .with_diagnostics(diagnostics));
            }
        }
        if diagnostics.privilege == PrivilegeLevel::Standard {
            log::warn!("host process is not elevated; process loopback may be denied");
        }

        let backend = |e: DeviceError| ActivationError::new(ActivationFailure::Backend, e.message);
        let mta = MtaUsage::acquire().map_err(backend)?;
        let _com = ComScope::enter().map_err(backend)?;

        let activated = unsafe {
            self.activate_client(process_id, timeout).and_then(|client| {
                let format = Self::initialize(&client)?;
                let capture: IAudioCaptureClient = client
                    .GetService()
                    .map_err(|e| activation_error("GetService(capture)", e))?;
                Ok((client, capture, format))
            })
        };
        let (client, capture, format) =
            activated.map_err(|e| e.with_diagnostics(diagnostics.clone()))?;

        log::info!(
            "process loopback active for pid {}: {:?} {}-bit, {} ch, {} Hz",
            process_id,
            format.encoding,
            format.bits_per_sample,
            format.channels,
            format.sample_rate
        );

        Ok(LoopbackActivation {
            client: Box::new(ProcessCaptureClient {
                client,
                capture,
                block_align: format.block_align(),
                thread: None,
                _mta: mta,
            }),
            format,
            session: Some(Box::new(TargetSessionProbe::new(process_id))),
        })
    }
}

/// Per-thread runtime held while the capture thread owns the client.
struct ThreadScope {
    _mmcss: Option<MmcssRegistration>,
    _com: ComScope,
}

/// Capture client of an activated process loopback.
pub struct ProcessCaptureClient {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    block_align: usize,
    thread: Option<ThreadScope>,
    _mta: MtaUsage,
}

// SAFETY: the clients live in the MTA, kept alive by `_mta`, and are used by
// one thread at a time as the core hands the client between control and
// capture threads.
unsafe impl Send for ProcessCaptureClient {}

impl CaptureClient for ProcessCaptureClient {
    fn attach_thread(&mut self) -> Result<(), DeviceError> {
        let com = ComScope::enter()?;
        self.thread = Some(ThreadScope {
            _mmcss: MmcssRegistration::pro_audio(),
            _com: com,
        });
        Ok(())
    }

    fn detach_thread(&mut self) {
        self.thread = None;
    }

    fn start(&mut self) -> Result<(), DeviceError> {
        unsafe { self.client.Start() }.map_err(|e| device_error("IAudioClient::Start", e))
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        unsafe {
            self.client.Stop().map_err(|e| device_error("IAudioClient::Stop", e))?;
            // Discard what is queued so a restart begins with fresh packets.
            self.client.Reset().map_err(|e| device_error("IAudioClient::Reset", e))
        }
    }

    fn read_packet(
        &mut self,
        sink: &mut dyn FnMut(CapturedPacket<'_>),
    ) -> Result<bool, DeviceError> {
        unsafe {
            let pending = self
                .capture
                .GetNextPacketSize()
                .map_err(|e| device_error("GetNextPacketSize", e))?;
            if pending == 0 {
                return Ok(false);
            }

            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames = 0u32;
            let mut flags = 0u32;
            self.capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                .map_err(|e| device_error("GetBuffer", e))?;

            if frames > 0 {
                let silent = flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null();
                let bytes = if silent {
                    &[][..]
                } else {
                    std::slice::from_raw_parts(data, frames as usize * self.block_align)
                };
                sink(CapturedPacket {
                    data: bytes,
                    frames: frames as usize,
                    silent,
                });
            }

            self.capture
                .ReleaseBuffer(frames)
                .map_err(|e| device_error("ReleaseBuffer", e))?;
            Ok(true)
        }
    }
}

impl Drop for ProcessCaptureClient {
    fn drop(&mut self) {
        let _ = unsafe { self.client.Stop() };
    }
}
