use std::path::Path;

/// One email to test, paired with the label we already know to be true.
#[derive(Debug, Clone)]
pub struct EmailItem {
    pub address: String,
    pub known_valid: bool,
}

/// Read a list of addresses, one per line. Blank lines and surrounding
/// whitespace are ignored. A missing file is a warning, not an error, so a
/// run can proceed with only one of the two lists.
pub fn read_emails_from_file(path: &str) -> Vec<String> {
    if !Path::new(path).exists() {
        log::warn!("email list file not found: {path}");
        return Vec::new();
    }
    match std::fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            log::warn!("failed to read email list {path}: {e}");
            Vec::new()
        }
    }
}

/// Combine the known-valid and known-invalid lists into one labeled batch,
/// valid addresses first.
pub fn load_email_set(valid_path: &str, invalid_path: &str) -> Vec<EmailItem> {
    let mut items: Vec<EmailItem> = read_emails_from_file(valid_path)
        .into_iter()
        .map(|address| EmailItem {
            address,
            known_valid: true,
        })
        .collect();
    items.extend(
        read_emails_from_file(invalid_path)
            .into_iter()
            .map(|address| EmailItem {
                address,
                known_valid: false,
            }),
    );
    items
}
