use std::collections::HashMap;
use std::sync::Mutex;

use aya::programs::{ProgramError, SchedClassifier, TcAttachType, tc};
use aya::programs::tc::SchedClassifierLinkId;
use aya::{Ebpf, EbpfLoader};
use domain::common::error::DomainError;
use domain::iface::entity::Interface;
use ports::secondary::classifier_port::ClassifierPort;
use tracing::{debug, info, warn};

const INGRESS_PROGRAM: &str = "ingress_flow_parse";
const EGRESS_PROGRAM: &str = "egress_flow_parse";

/// Loads the flow classifier object and rewrites its load-time
/// configuration (sampling rate, flow table capacity).
pub struct FlowPrograms {
    ebpf: Ebpf,
}

impl FlowPrograms {
    /// Load from raw ELF bytes. Returns an error when the verifier
    /// rejects the programs — fatal for the agent.
    pub fn load(
        program_bytes: &[u8],
        sampling: u32,
        cache_max_flows: u32,
    ) -> Result<Self, anyhow::Error> {
        let mut loader = EbpfLoader::new();
        loader.set_global("SAMPLING", &sampling, true);
        loader.set_max_entries(ebpf_common::flow::AGGREGATED_FLOWS_MAP, cache_max_flows);
        let mut ebpf = loader.load(program_bytes)?;

        // best-effort: the classifier has no log statements today
        if let Err(e) = aya_log::EbpfLogger::init(&mut ebpf) {
            debug!("eBPF logger init failed (non-fatal): {e}");
        }

        info!(sampling, cache_max_flows, "flow classifier object loaded");
        Ok(Self { ebpf })
    }

    /// Borrow the inner `Ebpf` to take maps before the classifier is
    /// handed its ownership.
    pub fn ebpf_mut(&mut self) -> &mut Ebpf {
        &mut self.ebpf
    }

    /// Finish loading: verify both entry points and wrap the object
    /// into the attachable classifier.
    pub fn into_classifier(
        mut self,
        enable_ingress: bool,
        enable_egress: bool,
    ) -> Result<TcFlowClassifier, anyhow::Error> {
        for name in [INGRESS_PROGRAM, EGRESS_PROGRAM] {
            let program: &mut SchedClassifier = self
                .ebpf
                .program_mut(name)
                .ok_or_else(|| anyhow::anyhow!("program '{name}' not found in eBPF object"))?
                .try_into()?;
            program.load()?;
        }
        Ok(TcFlowClassifier {
            inner: Mutex::new(ClassifierInner {
                ebpf: self.ebpf,
                links: HashMap::new(),
            }),
            enable_ingress,
            enable_egress,
        })
    }
}

struct ClassifierInner {
    ebpf: Ebpf,
    links: HashMap<String, Vec<(&'static str, SchedClassifierLinkId)>>,
}

/// Attaches `ingress_flow_parse`/`egress_flow_parse` at the tc hooks of
/// individual interfaces. One instance serves every interface; the link
/// registry keeps the detach handles.
pub struct TcFlowClassifier {
    inner: Mutex<ClassifierInner>,
    enable_ingress: bool,
    enable_egress: bool,
}

impl TcFlowClassifier {
    fn attach_one(
        inner: &mut ClassifierInner,
        program_name: &'static str,
        iface: &Interface,
        attach_type: TcAttachType,
    ) -> Result<(), DomainError> {
        let program: &mut SchedClassifier = inner
            .ebpf
            .program_mut(program_name)
            .ok_or_else(|| DomainError::AttachError(format!("program '{program_name}' missing")))?
            .try_into()
            .map_err(|e: ProgramError| DomainError::AttachError(e.to_string()))?;
        let link_id = program
            .attach(&iface.name, attach_type)
            .map_err(|e| DomainError::AttachError(format!("{program_name} on {iface}: {e}")))?;
        inner
            .links
            .entry(iface.name.clone())
            .or_default()
            .push((program_name, link_id));
        debug!(iface = %iface, program_name, "tc filter attached");
        Ok(())
    }
}

impl ClassifierPort for TcFlowClassifier {
    fn register(&self, iface: &Interface) -> Result<(), DomainError> {
        // clsact qdisc hosts both hook points; adding it twice is fine
        if let Err(e) = tc::qdisc_add_clsact(&iface.name) {
            debug!(iface = %iface, error = %e, "qdisc clsact add failed (may already exist)");
        }

        let mut inner = self.inner.lock().unwrap();
        if self.enable_egress {
            Self::attach_one(&mut inner, EGRESS_PROGRAM, iface, TcAttachType::Egress)?;
        }
        if self.enable_ingress {
            Self::attach_one(&mut inner, INGRESS_PROGRAM, iface, TcAttachType::Ingress)?;
        }
        Ok(())
    }

    fn unregister(&self, iface: &Interface) -> Result<(), DomainError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(links) = inner.links.remove(&iface.name) else {
            return Ok(());
        };
        for (program_name, link_id) in links {
            let Some(program) = inner.ebpf.program_mut(program_name) else {
                continue;
            };
            let program: &mut SchedClassifier = match program.try_into() {
                Ok(program) => program,
                Err(e) => {
                    let e: ProgramError = e;
                    return Err(DomainError::AttachError(e.to_string()));
                }
            };
            if let Err(e) = program.detach(link_id) {
                // the kernel already removed the filter with the device
                if is_enodev(&e) {
                    debug!(iface = %iface, program_name, "filter already gone with the interface");
                } else {
                    warn!(iface = %iface, program_name, error = %e, "tc filter detach failed");
                }
            }
        }
        Ok(())
    }
}

fn is_enodev(err: &ProgramError) -> bool {
    if let ProgramError::SyscallError(s) = err {
        return s.io_error.raw_os_error() == Some(libc::ENODEV);
    }
    false
}
