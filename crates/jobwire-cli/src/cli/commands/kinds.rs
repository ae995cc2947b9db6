use crate::exit_codes::EXIT_SUCCESS;
use jobwire_core::BackendKind;

pub fn run() -> anyhow::Result<i32> {
    let registry = super::build_registry()?;
    for tag in registry.tags() {
        let name = BackendKind::from_tag(tag).map_or(tag, BackendKind::display_name);
        println!("{tag:<12} {name}");
    }
    Ok(EXIT_SUCCESS)
}
