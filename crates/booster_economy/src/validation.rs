//! # Template Validation
//!
//! Catalog writes call [`validate_template`] explicitly before storing a
//! template. Nothing validates implicitly on save.

use booster_shared::CardTemplate;

use crate::error::ValidationError;

/// Name length bounds, in characters, after trimming.
pub const NAME_LEN: (usize, usize) = (2, 30);
/// Hit point bounds.
pub const HP_RANGE: (u32, u32) = (1, 300);
/// Attack damage bounds.
pub const DAMAGE_RANGE: (u32, u32) = (0, 300);
/// Retreat cost bounds.
pub const RETREAT_RANGE: (u32, u32) = (0, 4);
/// Maximum attacks on one card.
pub const MAX_ATTACKS: usize = 4;

const IMAGE_EXTENSIONS: [&str; 4] = [".jpg", ".jpeg", ".png", ".gif"];

/// Checks every catalog rule for a template.
///
/// # Errors
///
/// Returns the first rule the template breaks.
pub fn validate_template(template: &CardTemplate) -> Result<(), ValidationError> {
    check_length("name", &template.name)?;
    check_range("hp", u32::from(template.hp), HP_RANGE)?;
    check_range("retreat_cost", u32::from(template.retreat_cost), RETREAT_RANGE)?;

    if template.attacks.len() > MAX_ATTACKS {
        return Err(ValidationError::TooManyAttacks {
            max: MAX_ATTACKS,
            actual: template.attacks.len(),
        });
    }
    for attack in &template.attacks {
        check_length("attack name", &attack.name)?;
        check_range("attack damage", u32::from(attack.damage), DAMAGE_RANGE)?;
    }

    if template.weakness.is_some() && template.weakness == template.resistance {
        return Err(ValidationError::ResistanceEqualsWeakness);
    }

    if let Some(url) = &template.image_url {
        if !is_image_url(url) {
            return Err(ValidationError::InvalidImageUrl(url.clone()));
        }
    }

    Ok(())
}

fn check_length(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let actual = value.trim().chars().count();
    let (min, max) = NAME_LEN;
    if actual < min || actual > max {
        return Err(ValidationError::Length { field, min, max, actual });
    }
    Ok(())
}

fn check_range(field: &'static str, actual: u32, (min, max): (u32, u32)) -> Result<(), ValidationError> {
    if actual < min || actual > max {
        return Err(ValidationError::OutOfRange { field, min, max, actual });
    }
    Ok(())
}

/// `http(s)://<something>.<jpg|jpeg|png|gif>`, case-insensitive.
fn is_image_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));

    match rest {
        Some(rest) => IMAGE_EXTENSIONS
            .iter()
            .any(|ext| rest.len() > ext.len() && rest.ends_with(ext)),
        None => false,
    }
}
