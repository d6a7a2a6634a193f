//! Reconstruction pipeline - image → decoded IR → stack slots → dumps.

use tracing::info_span;

use relift_decode::{control_flow_json, Abi, Config, DebugInfo, DecodeResult, Decoder, InstructionLifter};
use relift_image::Image;
use relift_stack::StackAnalysis;

use crate::{Error, Result};

/// One reconstruction run over one image. Owns all mutable state; no
/// process-wide registries.
pub struct Pipeline<'a> {
    image: &'a dyn Image,
    config: &'a Config,
    debug: Option<&'a DebugInfo>,
    abi: Abi,
    result: Option<DecodeResult>,
}

impl<'a> Pipeline<'a> {
    pub fn new(image: &'a dyn Image, config: &'a Config) -> Self {
        Self {
            image,
            config,
            debug: None,
            abi: Abi::from_config(config),
            result: None,
        }
    }

    /// Attach debug info; the stack pass uses it for slot names and types.
    #[must_use]
    pub fn with_debug_info(mut self, debug: &'a DebugInfo) -> Self {
        self.debug = Some(debug);
        self
    }

    /// Replace the derived ABI (e.g. to register NOP patterns).
    #[must_use]
    pub fn with_abi(mut self, abi: Abi) -> Self {
        self.abi = abi;
        self
    }

    /// Run control-flow decoding.
    pub fn decode(&mut self, lifter: &mut dyn InstructionLifter) -> Result<()> {
        let span = info_span!("decode");
        let _guard = span.enter();
        let decoder = Decoder::new(self.image, self.config, &self.abi, lifter);
        self.result = Some(decoder.run()?);
        Ok(())
    }

    /// Run the stack pass. Returns whether any access was rewritten.
    pub fn reconstruct_stack(&mut self) -> Result<bool> {
        let span = info_span!("stack");
        let _guard = span.enter();
        let result = self
            .result
            .as_mut()
            .ok_or(Error::NotDecoded("reconstruct_stack"))?;
        Ok(StackAnalysis::run_on_module(
            &mut result.module,
            self.config,
            self.debug,
            &result.index,
        ))
    }

    /// Decoded artifacts, once `decode` has run.
    pub fn result(&self) -> Option<&DecodeResult> {
        self.result.as_ref()
    }

    /// Take ownership of the decoded artifacts.
    pub fn into_result(self) -> Option<DecodeResult> {
        self.result
    }

    /// Human-readable IR dump.
    pub fn dump_ir(&self) -> Result<String> {
        let result = self.result.as_ref().ok_or(Error::NotDecoded("dump_ir"))?;
        Ok(result.module.to_string())
    }

    /// JSON control-flow dump, diffable against external disassemblers.
    pub fn control_flow_json(&self) -> Result<String> {
        let result = self
            .result
            .as_ref()
            .ok_or(Error::NotDecoded("control_flow_json"))?;
        Ok(control_flow_json(&result.module, &result.index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relift_decode::testing::{x86_config, X86SubsetLifter};
    use relift_image::{Address, RawImage};

    #[test]
    fn test_stages_require_decode() {
        let image = RawImage::with_code(Address::new(0x1000), vec![0xc3]);
        let config = x86_config();
        let mut pipeline = Pipeline::new(&image, &config);
        assert!(matches!(
            pipeline.reconstruct_stack(),
            Err(Error::NotDecoded("reconstruct_stack"))
        ));
        assert!(pipeline.dump_ir().is_err());

        let mut lifter = X86SubsetLifter::new();
        pipeline.decode(&mut lifter).unwrap();
        assert!(pipeline.dump_ir().is_ok());
        assert!(pipeline.control_flow_json().is_ok());
    }
}
