//! Request assembly: instruction, then each document's label and pages.

use crate::error::AuditError;
use crate::model::{AuditRequest, ContentBlock, Role, StagedArtifact};
use crate::prompts::document_label;

/// Build the ordered multimodal request.
///
/// Layout: `[instruction]`, PO label, PO images in page order, invoice
/// label, invoice images in page order. The artifacts are re-sorted here so
/// callers may pass them in completion order.
///
/// # Errors
/// [`AuditError::InvalidConfig`] if an artifact sits under the other
/// document's label (e.g. invoice pages passed as `po`).
pub fn build_request(
    instruction: &str,
    po: &[StagedArtifact],
    invoice: &[StagedArtifact],
) -> Result<AuditRequest, AuditError> {
    check_roles(Role::Po, po)?;
    check_roles(Role::Invoice, invoice)?;

    let mut blocks = Vec::with_capacity(po.len() + invoice.len() + 2);
    push_document(&mut blocks, Role::Po, po);
    push_document(&mut blocks, Role::Invoice, invoice);
    Ok(AuditRequest {
        instruction: instruction.to_string(),
        blocks,
    })
}

fn check_roles(expected: Role, artifacts: &[StagedArtifact]) -> Result<(), AuditError> {
    match artifacts.iter().find(|a| a.role != expected) {
        Some(stray) => Err(AuditError::InvalidConfig(format!(
            "{} page {} ({}) cannot be labelled as the {} document",
            stray.role, stray.page, stray.key, expected
        ))),
        None => Ok(()),
    }
}

fn push_document(blocks: &mut Vec<ContentBlock>, role: Role, artifacts: &[StagedArtifact]) {
    let mut ordered: Vec<&StagedArtifact> = artifacts.iter().collect();
    ordered.sort_by_key(|a| a.page);
    blocks.push(ContentBlock::Text(document_label(role).to_string()));
    blocks.extend(ordered.into_iter().map(|a| ContentBlock::Image(a.url.clone())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn artifact(role: Role, page: usize) -> StagedArtifact {
        StagedArtifact {
            role,
            page,
            key: format!("{role}_page_{page}.png"),
            url: format!("https://blob/{role}_page_{page}.png"),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn layout_is_label_then_pages_per_document() {
        let po = vec![artifact(Role::Po, 2), artifact(Role::Po, 1)];
        let invoice = vec![artifact(Role::Invoice, 1)];
        let req = build_request("Audit these.", &po, &invoice).unwrap();

        assert_eq!(req.text_block_count(), 2);
        assert_eq!(req.image_block_count(), 3);
        assert_eq!(
            req.blocks,
            vec![
                ContentBlock::Text(document_label(Role::Po).into()),
                ContentBlock::Image("https://blob/po_page_1.png".into()),
                ContentBlock::Image("https://blob/po_page_2.png".into()),
                ContentBlock::Text(document_label(Role::Invoice).into()),
                ContentBlock::Image("https://blob/invoice_page_1.png".into()),
            ]
        );
    }

    #[test]
    fn instruction_leads_on_the_wire() {
        let req = build_request("Audit these.", &[artifact(Role::Po, 1)], &[artifact(Role::Invoice, 1)])
            .unwrap();
        let wire: Vec<ContentBlock> = req.content().collect();
        assert_eq!(wire.len(), 5);
        assert_eq!(wire[0], ContentBlock::Text("Audit these.".into()));
        assert!(wire[1].is_text());
    }

    #[test]
    fn image_count_is_sum_of_pages() {
        let po: Vec<_> = (1..=4).map(|p| artifact(Role::Po, p)).collect();
        let invoice: Vec<_> = (1..=3).map(|p| artifact(Role::Invoice, p)).collect();
        let req = build_request("x", &po, &invoice).unwrap();
        assert_eq!(req.image_block_count(), 7);
        assert_eq!(req.image_urls().count(), 7);
    }

    #[test]
    fn swapped_artifacts_are_rejected() {
        let po = vec![artifact(Role::Po, 1)];
        let invoice = vec![artifact(Role::Invoice, 1), artifact(Role::Invoice, 2)];

        let err = build_request("x", &invoice, &po).unwrap_err();
        assert!(matches!(err, AuditError::InvalidConfig(ref m) if m.contains("invoice_page_1.png")));

        let mut mixed = invoice.clone();
        mixed.push(artifact(Role::Po, 3));
        assert!(build_request("x", &po, &mixed).is_err());
    }
}
