//! Sizing architecture heads from the post-processor's vocabulary
//!
//! Reconciliation is a pure transformation: it consumes an
//! [`ArchitectureSpec`] and returns a [`ReconciledArchitecture`], the only
//! descriptor the model builder accepts. Building a model before the
//! post-processor therefore does not type-check.
//!
//! Two alphabet slots are reserved for the `CTCLoss` family of
//! post-processors. Across the sub-models of a distillation ensemble the
//! reservation is taken from a running alphabet size, so every MultiHead
//! sub-model sees two fewer symbols than the one before it, and plain heads
//! that follow receive the already-reduced size.

use crate::config::{ArchitectureSpec, HeadSpec};
use crate::error::{Error, Result};
use crate::postprocess::PostProcessor;

/// Post-process name that reserves two slots on a single MultiHead model.
const RESERVING_SINGLE: &str = "CTCLoss";

/// Post-process name that reserves two slots on distillation MultiHeads.
const RESERVING_DISTILLATION: &str = "DistillationCTCLoss";

/// Architecture whose head dimensions agree with the vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledArchitecture {
    spec: ArchitectureSpec,
    vocabulary_len: Option<usize>,
}

impl ReconciledArchitecture {
    pub fn spec(&self) -> &ArchitectureSpec {
        &self.spec
    }

    /// Vocabulary length the heads were sized from, if any.
    pub fn vocabulary_len(&self) -> Option<usize> {
        self.vocabulary_len
    }
}

/// Reconcile `spec` against a built post-processor.
pub fn reconcile(spec: ArchitectureSpec, post_process: &dyn PostProcessor) -> Result<ReconciledArchitecture> {
    reconcile_dimensions(spec, post_process.vocabulary().map(|v| v.len()), post_process.name())
}

/// Reconcile `spec` given a vocabulary length and the post-process name.
///
/// Without a vocabulary the descriptor is returned unchanged.
pub fn reconcile_dimensions(
    spec: ArchitectureSpec,
    vocabulary_len: Option<usize>,
    post_process: &str,
) -> Result<ReconciledArchitecture> {
    let Some(base) = vocabulary_len else {
        tracing::debug!(post_process, "post-process exposes no vocabulary, heads left as declared");
        return Ok(ReconciledArchitecture { spec, vocabulary_len });
    };

    let spec = match spec {
        ArchitectureSpec::Distillation(mut ensemble) => {
            let mut char_num = base;
            for (name, model) in &mut ensemble.models {
                let path = format!("Architecture.Models.{name}.Head");
                match &mut model.head {
                    HeadSpec::MultiHead(head) => {
                        if post_process == RESERVING_DISTILLATION {
                            char_num = reserve(char_num, post_process)?;
                        }
                        head.set_ctc_character_num(char_num, &path)?;
                        tracing::info!(model = %name, character_num = char_num, "sized MultiHead CTC branch");
                    }
                    HeadSpec::Plain(head) => {
                        head.out_channels = Some(char_num);
                        tracing::info!(model = %name, out_channels = char_num, "sized head");
                    }
                }
            }
            ArchitectureSpec::Distillation(ensemble)
        }
        ArchitectureSpec::Single(mut model) => {
            match &mut model.head {
                HeadSpec::MultiHead(head) => {
                    let n = if post_process == RESERVING_SINGLE {
                        reserve(base, post_process)?
                    } else {
                        base
                    };
                    head.set_ctc_character_num(n, "Architecture.Head")?;
                    tracing::info!(character_num = n, "sized MultiHead CTC branch");
                }
                HeadSpec::Plain(head) => {
                    head.out_channels = Some(base);
                    tracing::info!(out_channels = base, "sized head");
                }
            }
            ArchitectureSpec::Single(model)
        }
    };

    Ok(ReconciledArchitecture { spec, vocabulary_len })
}

fn reserve(size: usize, post_process: &str) -> Result<usize> {
    size.checked_sub(2).ok_or_else(|| {
        Error::config(
            "PostProcess.name",
            format!("{post_process} reserves two symbols but the vocabulary has only {size}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeadSpec, ModelSpec};
    use proptest::prelude::*;
    use serde_yaml::Value;

    fn spec(yaml: &str) -> ArchitectureSpec {
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        ArchitectureSpec::from_value(&value).unwrap()
    }

    fn single(reconciled: &ReconciledArchitecture) -> &ModelSpec {
        match reconciled.spec() {
            ArchitectureSpec::Single(model) => model,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn out_channels(model: &ModelSpec) -> Option<usize> {
        match &model.head {
            HeadSpec::Plain(head) => head.out_channels,
            HeadSpec::MultiHead(_) => None,
        }
    }

    fn character_num(model: &ModelSpec) -> Option<usize> {
        match &model.head {
            HeadSpec::MultiHead(head) => head.ctc_character_num(),
            HeadSpec::Plain(_) => None,
        }
    }

    const MULTI_HEAD: &str = "Head:\n  name: MultiHead\n  head_list:\n    - CTCLabelDecode:\n    - SARLabelDecode:\n";

    #[test]
    fn test_plain_head_gets_vocabulary_length() {
        let reconciled =
            reconcile_dimensions(spec("algorithm: CRNN\nHead: {name: CTCHead}"), Some(3), "CTCLabelDecode")
                .unwrap();
        assert_eq!(out_channels(single(&reconciled)), Some(3));
        assert_eq!(reconciled.vocabulary_len(), Some(3));
    }

    #[test]
    fn test_single_multi_head_ctc_loss_reserves_two() {
        let reconciled = reconcile_dimensions(spec(MULTI_HEAD), Some(3), "CTCLoss").unwrap();
        assert_eq!(character_num(single(&reconciled)), Some(1));
    }

    #[test]
    fn test_single_multi_head_other_post_process_keeps_base() {
        let reconciled = reconcile_dimensions(spec(MULTI_HEAD), Some(3), "CTCLabelDecode").unwrap();
        assert_eq!(character_num(single(&reconciled)), Some(3));
    }

    #[test]
    fn test_distillation_decrements_running_size() {
        let yaml = r#"
algorithm: Distillation
Models:
  Teacher:
    Head:
      name: MultiHead
      head_list:
        CTCLabelDecode: {}
        SARLabelDecode: {}
  Student:
    Head:
      name: MultiHead
      head_list:
        CTCLabelDecode: {}
        SARLabelDecode: {}
"#;
        let reconciled = reconcile_dimensions(spec(yaml), Some(10), "DistillationCTCLoss").unwrap();
        let ArchitectureSpec::Distillation(ensemble) = reconciled.spec() else {
            panic!("expected distillation")
        };
        let sizes: Vec<Option<usize>> =
            ensemble.models.iter().map(|(_, model)| character_num(model)).collect();
        assert_eq!(sizes, vec![Some(8), Some(6)]);
    }

    #[test]
    fn test_distillation_plain_head_after_multi_head_sees_running_size() {
        let yaml = r#"
algorithm: Distillation
Models:
  Teacher:
    Head: {name: MultiHead, head_list: {CTCLabelDecode: {}}}
  Student:
    Head: {name: CTCHead}
"#;
        let reconciled = reconcile_dimensions(spec(yaml), Some(10), "DistillationCTCLoss").unwrap();
        let ArchitectureSpec::Distillation(ensemble) = reconciled.spec() else {
            panic!("expected distillation")
        };
        assert_eq!(character_num(&ensemble.models[0].1), Some(8));
        assert_eq!(out_channels(&ensemble.models[1].1), Some(8));
    }

    #[test]
    fn test_distillation_without_reserving_post_process() {
        let yaml = r#"
algorithm: Distillation
Models:
  Teacher:
    Head: {name: MultiHead, head_list: {CTCLabelDecode: {}}}
  Student:
    Head: {name: MultiHead, head_list: {CTCLabelDecode: {}}}
"#;
        let reconciled =
            reconcile_dimensions(spec(yaml), Some(10), "DistillationCTCLabelDecode").unwrap();
        let ArchitectureSpec::Distillation(ensemble) = reconciled.spec() else {
            panic!("expected distillation")
        };
        assert!(ensemble.models.iter().all(|(_, m)| character_num(m) == Some(10)));
    }

    #[test]
    fn test_no_vocabulary_passes_through() {
        let original = spec("model_type: det\nalgorithm: DB\nHead: {name: DBHead, k: 50}");
        let reconciled = reconcile_dimensions(original.clone(), None, "DBPostProcess").unwrap();
        assert_eq!(reconciled.spec(), &original);
    }

    #[test]
    fn test_multi_head_without_ctc_branch() {
        let yaml = "Head: {name: MultiHead, head_list: {SARLabelDecode: {}}}";
        let err = reconcile_dimensions(spec(yaml), Some(5), "CTCLabelDecode").unwrap_err();
        assert!(err.to_string().contains("Architecture.Head.head_list.CTCLabelDecode"));
    }

    #[test]
    fn test_reservation_underflow() {
        let err = reconcile_dimensions(spec(MULTI_HEAD), Some(1), "CTCLoss").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    proptest! {
        #[test]
        fn prop_plain_head_always_gets_base(base in 1usize..10_000, reserving in any::<bool>()) {
            let post = if reserving { "CTCLoss" } else { "CTCLabelDecode" };
            let reconciled =
                reconcile_dimensions(spec("Head: {name: CTCHead, out_channels: 7}"), Some(base), post)
                    .unwrap();
            prop_assert_eq!(out_channels(single(&reconciled)), Some(base));
        }
    }
}
