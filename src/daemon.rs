use crate::frontend::Frontend;
use anyhow::{Context, Result};
use credence_store::attributes::{self, InstallAttributesSourceDelegate};
use credence_store::parser::DEFAULT_FORMAT;
use credence_store::signed::{self, SignedSourceDelegate};
use credence_store::{
    DocumentManager, NVRam, SettingsBlobParserRegistry, SettingsDocument, SourceDelegateFactory,
    VersionStamp,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// File system locations the store works from.
#[derive(Clone, Debug)]
pub struct ConfigPaths {
    /// Directory settings blobs are persisted under.
    pub storage_dir: PathBuf,
    /// The bootstrap trusted document, stored as an archived document
    /// payload.
    pub trusted_document: PathBuf,
}

/// Assembles a complete store: the built-in blob formats and delegate
/// types, the trusted document loaded from disk, and an initialised
/// document manager behind a [`Frontend`].
pub struct Daemon {
    frontend: Frontend,
}

impl Daemon {
    pub fn new(paths: &ConfigPaths, nvram: Rc<dyn NVRam>) -> Result<Self> {
        let trusted_document = load_trusted_document(&paths.trusted_document)?;
        let mut manager = DocumentManager::new(
            default_parser_registry(),
            default_delegate_factory(nvram),
            paths.storage_dir.clone(),
            trusted_document,
        );
        manager.init();
        Ok(Self {
            frontend: Frontend::new(manager),
        })
    }

    pub fn frontend(&self) -> &Frontend {
        &self.frontend
    }

    pub fn frontend_mut(&mut self) -> &mut Frontend {
        &mut self.frontend
    }
}

/// The parser registry covering the built-in blob formats. The signed
/// format doubles as the default.
pub fn default_parser_registry() -> Rc<SettingsBlobParserRegistry> {
    let registry = SettingsBlobParserRegistry::new();
    registry.register(DEFAULT_FORMAT, Box::new(signed::parse_signed_blob));
    registry.register(signed::FORMAT_SIGNED, Box::new(signed::parse_signed_blob));
    registry.register(
        attributes::FORMAT_INSTALL_ATTRIBUTES,
        Box::new(attributes::parse_install_attributes),
    );
    Rc::new(registry)
}

/// The delegate factory covering the built-in source types.
pub fn default_delegate_factory(nvram: Rc<dyn NVRam>) -> Rc<SourceDelegateFactory> {
    let factory = SourceDelegateFactory::new();
    factory.register(
        signed::FORMAT_SIGNED,
        Box::new(SignedSourceDelegate::create),
    );
    factory.register(
        attributes::FORMAT_INSTALL_ATTRIBUTES,
        Box::new(move |source_id, settings| {
            InstallAttributesSourceDelegate::create(nvram.clone(), source_id, settings)
        }),
    );
    Rc::new(factory)
}

fn load_trusted_document(path: &Path) -> Result<Box<dyn SettingsDocument>> {
    let blob = fs::read(path)
        .with_context(|| format!("failed to read trusted document {}", path.display()))?;
    signed::decode_document(&blob, VersionStamp::new())
        .with_context(|| format!("failed to decode trusted document {}", path.display()))
}
