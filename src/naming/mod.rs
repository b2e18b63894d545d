// Minification: short, fresh names for classes and methods, subject to keep
// rules, library boundaries and Dalvik dispatch.

pub mod class_minifier;
pub mod map;
pub mod method_minifier;
pub mod signature;
pub mod state;

pub use class_minifier::{ClassNameMinifier, ClassRenaming};
pub use map::ProguardMap;
pub use method_minifier::MethodNameMinifier;
pub use state::{NamingStateId, NamingStatePool};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::graph::{Application, NamingLens};
use crate::shaking::rules::Configuration;
use crate::shaking::RootSet;

const IDENTIFIER_CHARACTERS: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Bijective base-52 identifier sequence: 1 -> "a", 26 -> "z", 27 -> "A",
/// 52 -> "Z", 53 -> "aa", ...
pub(crate) fn number_to_identifier(number: usize) -> String {
    debug_assert!(number > 0);
    let base = IDENTIFIER_CHARACTERS.len();
    let mut n = number;
    let mut buffer = Vec::new();
    while n > 0 {
        n -= 1;
        buffer.push(IDENTIFIER_CHARACTERS[n % base]);
        n /= base;
    }
    buffer.reverse();
    String::from_utf8(buffer).expect("identifier characters are ascii")
}

/// Runs both minifiers and folds their renamings into a lens.
pub struct Minifier<'a> {
    app: &'a Application,
    root_set: &'a RootSet,
    config: &'a Configuration,
}

impl<'a> Minifier<'a> {
    pub fn new(app: &'a Application, root_set: &'a RootSet, config: &'a Configuration) -> Self {
        Minifier {
            app,
            root_set,
            config,
        }
    }

    pub fn run(&self) -> NamingLens {
        info!("computing class renaming");
        let class_renaming =
            ClassNameMinifier::new(self.app, self.root_set, self.config).compute_renaming();
        info!("computing method renaming");
        let method_renaming =
            MethodNameMinifier::new(self.app, self.root_set, self.config).compute_renaming();

        let factory = &self.app.factory;
        let types: HashMap<_, Arc<str>> = class_renaming
            .types
            .into_iter()
            .filter(|(ty, renamed)| &*factory.descriptor(*ty) != renamed.as_str())
            .map(|(ty, renamed)| (ty, Arc::from(renamed.as_str())))
            .collect();
        let methods: HashMap<_, Arc<str>> = method_renaming
            .into_iter()
            .filter(|(method, renamed)| factory.method_name(*method) != *renamed)
            .map(|(method, renamed)| (method, Arc::from(&*factory.string(renamed))))
            .collect();
        NamingLens::new(types, methods).with_signature_renaming(class_renaming.signatures)
    }
}
