// Proguard-syntax configuration parser.
//
// A cursor over the raw text; every rule and option is recognized by
// exact-prefix acceptance the way the original toolchain does it, so option
// names that share prefixes (-keep, -keepclassmembers, ...) parse without a
// tokenizer. Unknown options are a hard error; known-but-irrelevant options
// fall into fixed ignored/warned sets.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use miette::NamedSource;
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::graph::{AccessFlags, ItemFactory};
use crate::shaking::rules::{
    ClassSpecification, ClassType, Configuration, KeepModifiers, KeepRuleType, MemberRule,
    MemberRuleType, NamePattern, PackageObfuscationMode, ReturnValue, Rule, TypeMatcher,
};

const IGNORED_SINGLE_ARG_OPTIONS: &[&str] = &["protomapping", "target"];
const IGNORED_OPTIONAL_SINGLE_ARG_OPTIONS: &[&str] =
    &["keepdirectories", "runtype", "laststageoutput"];
const IGNORED_FLAG_OPTIONS: &[&str] = &[
    "forceprocessing",
    "dontusemixedcaseclassnames",
    "dontpreverify",
    "experimentalshrinkunusedprotofields",
    "filterlibraryjarswithorginalprogramjars",
    "dontskipnonpubliclibraryclasses",
    "dontskipnonpubliclibraryclassmembers",
    "overloadaggressively",
    "invokebasemethod",
];
const IGNORED_CLASS_SPEC_OPTIONS: &[&str] =
    &["isclassnamestring", "identifiernamestring", "whyarenotsimple"];
const WARNED_SINGLE_ARG_OPTIONS: &[&str] = &[
    "renamesourcefileattribute",
    "dontnote",
    "printconfiguration",
    "outjars",
    "adaptresourcefilecontents",
];
const UNSUPPORTED_FLAG_OPTIONS: &[&str] = &["skipnonpubliclibraryclasses"];

pub struct ConfigurationParser {
    factory: Arc<ItemFactory>,
    config: Configuration,
}

impl ConfigurationParser {
    pub fn new(factory: Arc<ItemFactory>) -> Self {
        ConfigurationParser {
            factory,
            config: Configuration::new(),
        }
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("failed to read configuration file: {e}"),
            source_code: NamedSource::new(path.display().to_string(), String::new()),
            span: (0, 0).into(),
            line: 1,
            column: 1,
        })?;
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.parse_source(&path.display().to_string(), &contents, base)
    }

    pub fn parse_string(&mut self, name: &str, contents: &str) -> Result<(), ConfigError> {
        self.parse_source(name, contents, PathBuf::from("."))
    }

    fn parse_source(
        &mut self,
        name: &str,
        contents: &str,
        base_directory: PathBuf,
    ) -> Result<(), ConfigError> {
        let mut parser = SourceParser {
            name: name.to_string(),
            contents: contents.to_string(),
            position: 0,
            base_directory,
            factory: self.factory.clone(),
        };
        parser.parse(&mut self.config)
    }

    pub fn finish(self) -> Configuration {
        self.config
    }
}

struct SourceParser {
    name: String,
    contents: String,
    position: usize,
    base_directory: PathBuf,
    factory: Arc<ItemFactory>,
}

impl SourceParser {
    fn parse(&mut self, config: &mut Configuration) -> Result<(), ConfigError> {
        loop {
            self.skip_whitespace();
            if !self.parse_option(config)? {
                return Ok(());
            }
        }
    }

    fn parse_option(&mut self, config: &mut Configuration) -> Result<bool, ConfigError> {
        if self.eof() {
            return Ok(false);
        }
        if self.accept_char('@') {
            let path = self.parse_file_name()?;
            self.parse_include(config, &path)?;
            return Ok(true);
        }
        self.expect_char('-')?;

        for option in IGNORED_SINGLE_ARG_OPTIONS {
            if self.skip_option_with_single_arg(option) {
                return Ok(true);
            }
        }
        for option in IGNORED_OPTIONAL_SINGLE_ARG_OPTIONS {
            if self.skip_option_with_optional_single_arg(option) {
                return Ok(true);
            }
        }
        for option in IGNORED_CLASS_SPEC_OPTIONS {
            if self.skip_option_with_class_spec(option) {
                return Ok(true);
            }
        }
        if self.parse_optimizations_option() {
            return Ok(true);
        }
        for option in WARNED_SINGLE_ARG_OPTIONS {
            if self.skip_option_with_single_arg(option) {
                warn!("ignoring option: -{option}");
                return Ok(true);
            }
        }
        for option in UNSUPPORTED_FLAG_OPTIONS {
            if self.accept_string(option) {
                return Err(self.error(format!("Unsupported option: -{option}")));
            }
        }

        if self.accept_string("keepattributes") {
            let patterns = self
                .accept_pattern_list()
                .ok_or_else(|| self.error("Expected attribute pattern list"))?;
            config
                .keep_attribute_patterns
                .extend(patterns.split(',').map(str::to_string));
        } else if self.accept_string("keeppackagenames") {
            let mut spec = ClassSpecification::new(ClassType::Class);
            spec.class_names = self.parse_class_names()?;
            config.rules.push(Rule::KeepPackageNames(spec));
        } else if self.accept_string("checkdiscard") {
            let spec = self.parse_class_spec(false)?;
            config.rules.push(Rule::CheckDiscard(spec));
        } else if self.accept_string("keep") {
            let rule = self.parse_keep_rule()?;
            config.rules.push(rule);
        } else if self.accept_string("whyareyoukeeping") {
            let spec = self.parse_class_spec(false)?;
            config.rules.push(Rule::WhyAreYouKeeping(spec));
        } else if self.accept_string("dontoptimize") {
            config.optimize = false;
        } else if self.accept_string("optimizationpasses") {
            self.skip_whitespace();
            self.accept_integer()
                .ok_or_else(|| self.error("Missing n of \"-optimizationpasses n\""))?;
            warn!("ignoring option: -optimizationpasses");
        } else if self.accept_string("dontobfuscate") {
            config.obfuscate = false;
        } else if self.accept_string("dontshrink") {
            config.shrink = false;
        } else if self.accept_string("printusage") {
            config.print_usage = true;
            self.skip_whitespace();
            if self.optional_argument_given() {
                config.print_usage_file = Some(self.parse_file_name()?);
            }
        } else if self.accept_string("verbose") {
            config.verbose = true;
        } else if self.accept_string("ignorewarnings") {
            config.ignore_warnings = true;
        } else if self.accept_string("dontwarn") {
            loop {
                let name = self.parse_class_name()?;
                config
                    .dont_warn_patterns
                    .push(TypeMatcher::create(&name, &self.factory));
                if !self.accept_char(',') {
                    break;
                }
            }
        } else if self.accept_string("repackageclasses") {
            if config.package_obfuscation_mode == PackageObfuscationMode::Flatten {
                warn!("option -repackageclasses overrides -flattenpackagehierarchy");
            }
            config.package_obfuscation_mode = PackageObfuscationMode::Repackage;
            self.skip_whitespace();
            if self.accept_char('\'') {
                config.package_prefix = self.accept_class_name().unwrap_or_default();
                self.expect_char('\'')?;
            } else {
                config.package_prefix = String::new();
            }
        } else if self.accept_string("flattenpackagehierarchy") {
            if config.package_obfuscation_mode == PackageObfuscationMode::Repackage {
                warn!("option -repackageclasses overrides -flattenpackagehierarchy");
                self.skip_whitespace();
                if self.optional_argument_given() {
                    self.skip_single_argument();
                }
            } else {
                config.package_obfuscation_mode = PackageObfuscationMode::Flatten;
                self.skip_whitespace();
                if self.accept_char('\'') {
                    config.package_prefix = self.accept_class_name().unwrap_or_default();
                    self.expect_char('\'')?;
                } else {
                    config.package_prefix = String::new();
                }
            }
        } else if self.accept_string("allowaccessmodification") {
            config.allow_access_modification = true;
        } else if self.accept_string("printmapping") {
            config.print_mapping = true;
            self.skip_whitespace();
            if self.optional_argument_given() {
                config.print_mapping_file = Some(self.parse_file_name()?);
            }
        } else if self.accept_string("assumenosideeffects") {
            let spec = self.parse_class_spec(true)?;
            config.rules.push(Rule::AssumeNoSideEffects(spec));
        } else if self.accept_string("assumevalues") {
            let spec = self.parse_class_spec(true)?;
            config.rules.push(Rule::AssumeValues(spec));
        } else if self.accept_string("include") {
            self.skip_whitespace();
            let path = self.parse_file_name()?;
            self.parse_include(config, &path)?;
        } else if self.accept_string("basedirectory") {
            self.skip_whitespace();
            self.base_directory = self.parse_file_name()?;
        } else if self.accept_string("injars") {
            config.injars.extend(self.parse_class_path()?);
        } else if self.accept_string("libraryjars") {
            config.library_jars.extend(self.parse_class_path()?);
        } else if self.accept_string("printseeds") {
            config.print_seeds = true;
            self.skip_whitespace();
            if self.optional_argument_given() {
                config.print_seeds_file = Some(self.parse_file_name()?);
            }
        } else if self.accept_string("obfuscationdictionary") {
            let path = self.parse_file_name()?;
            config.obfuscation_dictionary = read_dictionary(&path, self)?;
        } else if self.accept_string("classobfuscationdictionary") {
            let path = self.parse_file_name()?;
            config.class_obfuscation_dictionary = read_dictionary(&path, self)?;
        } else if self.accept_string("packageobfuscationdictionary") {
            let path = self.parse_file_name()?;
            config.package_obfuscation_dictionary = read_dictionary(&path, self)?;
        } else if self.accept_string("alwaysinline") {
            let spec = self.parse_class_spec(false)?;
            config.rules.push(Rule::AlwaysInline(spec));
        } else {
            return Err(self.error("Unknown option"));
        }
        Ok(true)
    }

    fn parse_include(&mut self, config: &mut Configuration, path: &Path) -> Result<(), ConfigError> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_directory.join(path)
        };
        let contents = std::fs::read_to_string(&resolved).map_err(|e| {
            self.error(format!(
                "Included file '{}' not readable: {e}",
                resolved.display()
            ))
        })?;
        let mut nested = SourceParser {
            name: resolved.display().to_string(),
            contents,
            position: 0,
            base_directory: resolved
                .parent()
                .unwrap_or(Path::new("."))
                .to_path_buf(),
            factory: self.factory.clone(),
        };
        nested.parse(config)
    }

    fn skip_flag(&mut self, name: &str) -> bool {
        if self.accept_string(name) {
            debug!("skipping -{name} flag");
            return true;
        }
        false
    }

    fn skip_option_with_single_arg(&mut self, name: &str) -> bool {
        if self.accept_string(name) {
            self.skip_single_argument();
            return true;
        }
        false
    }

    fn skip_option_with_optional_single_arg(&mut self, name: &str) -> bool {
        if self.accept_string(name) {
            self.skip_whitespace();
            if self.optional_argument_given() {
                self.skip_single_argument();
            }
            return true;
        }
        false
    }

    fn skip_option_with_class_spec(&mut self, name: &str) -> bool {
        if self.accept_string(name) {
            debug!("skipping -{name} option");
            let _ = self.parse_class_spec(false);
            return true;
        }
        false
    }

    fn parse_optimizations_option(&mut self) -> bool {
        // Flags have to be tried before their prefixed siblings; the flag
        // list contains entries that share a prefix with real options.
        for option in IGNORED_FLAG_OPTIONS {
            if self.skip_flag(option) {
                return true;
            }
        }
        if !self.accept_string("optimizations") {
            return false;
        }
        self.skip_whitespace();
        loop {
            self.skip_optimization_name();
            self.skip_whitespace();
            if !self.accept_char(',') {
                break;
            }
        }
        true
    }

    fn skip_optimization_name(&mut self) {
        if self.accept_char('!') {
            self.skip_whitespace();
        }
        while let Some(c) = self.peek() {
            if c.is_alphabetic() || c == '/' || c == '*' {
                self.position += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn skip_single_argument(&mut self) {
        self.skip_whitespace();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            self.position += c.len_utf8();
        }
    }

    fn parse_keep_rule(&mut self) -> Result<Rule, ConfigError> {
        let mut modifiers = KeepModifiers::default();
        let keep_type = if self.accept_string("names") {
            modifiers.allows_shrinking = true;
            KeepRuleType::Keep
        } else if self.accept_string("class") {
            if self.accept_string("members") {
                KeepRuleType::KeepClassMembers
            } else if self.accept_string("eswithmembers") {
                KeepRuleType::KeepClassesWithMembers
            } else if self.accept_string("membernames") {
                modifiers.allows_shrinking = true;
                KeepRuleType::KeepClassMembers
            } else if self.accept_string("eswithmembernames") {
                modifiers.allows_shrinking = true;
                KeepRuleType::KeepClassesWithMembers
            } else {
                return Err(self.error("Unknown option"));
            }
        } else {
            KeepRuleType::Keep
        };
        self.parse_rule_modifiers(&mut modifiers);
        let mut spec = self.parse_class_spec(false)?;
        if spec.member_rules.is_empty() {
            // A bare -keep implies the parameterless constructor.
            spec.member_rules.push(MemberRule {
                annotation: None,
                access_flags: AccessFlags::default(),
                negated_access_flags: AccessFlags::default(),
                rule_type: MemberRuleType::Init,
                name: Some(NamePattern::new("<init>")),
                type_matcher: None,
                arguments: Some(Vec::new()),
                return_value: None,
            });
        }
        Ok(Rule::Keep {
            keep_type,
            modifiers,
            spec,
        })
    }

    fn parse_rule_modifiers(&mut self, modifiers: &mut KeepModifiers) {
        while self.accept_char(',') {
            if self.accept_string("allow") {
                if self.accept_string("shrinking") {
                    modifiers.allows_shrinking = true;
                } else if self.accept_string("optimization") {
                    modifiers.allows_optimization = true;
                } else if self.accept_string("obfuscation") {
                    modifiers.allows_obfuscation = true;
                }
            } else if self.accept_string("includedescriptorclasses") {
                modifiers.include_descriptor_classes = true;
            }
        }
    }

    fn parse_class_spec(
        &mut self,
        allow_value_specification: bool,
    ) -> Result<ClassSpecification, ConfigError> {
        let mut spec = ClassSpecification::new(ClassType::Class);
        self.parse_class_flags_and_annotations(&mut spec)?;
        spec.class_type = self.parse_class_type()?;
        spec.class_names = self.parse_class_names()?;
        self.parse_inheritance(&mut spec)?;
        self.parse_member_rules(&mut spec, allow_value_specification)?;
        Ok(spec)
    }

    fn parse_annotation(&mut self) -> Result<Option<TypeMatcher>, ConfigError> {
        self.skip_whitespace();
        let start = self.position;
        if self.accept_char('@') {
            let name = self.parse_class_name()?;
            if name == "interface" {
                // Not an annotation but the @interface class type; rewind.
                self.position = start;
                return Ok(None);
            }
            return Ok(Some(TypeMatcher::create(&name, &self.factory)));
        }
        Ok(None)
    }

    fn parse_negation(&mut self) -> bool {
        self.skip_whitespace();
        self.accept_char('!')
    }

    fn parse_class_flags_and_annotations(
        &mut self,
        spec: &mut ClassSpecification,
    ) -> Result<(), ConfigError> {
        loop {
            self.skip_whitespace();
            if let Some(annotation) = self.parse_annotation()? {
                spec.class_annotation = Some(annotation);
                continue;
            }
            let negated = self.parse_negation();
            self.skip_whitespace();
            let flag = if self.accept_string("public") {
                AccessFlags::PUBLIC
            } else if self.accept_string("final") {
                AccessFlags::FINAL
            } else if self.accept_string("abstract") {
                AccessFlags::ABSTRACT
            } else {
                if negated {
                    return Err(self.error("Expected access flag after '!'"));
                }
                return Ok(());
            };
            if negated {
                spec.negated_class_access_flags.set(flag);
            } else {
                spec.class_access_flags.set(flag);
            }
        }
    }

    fn parse_class_type(&mut self) -> Result<ClassType, ConfigError> {
        self.skip_whitespace();
        if self.accept_string("@interface") {
            Ok(ClassType::AnnotationInterface)
        } else if self.accept_string("interface") {
            Ok(ClassType::Interface)
        } else if self.accept_string("class") {
            Ok(ClassType::Class)
        } else if self.accept_string("enum") {
            Ok(ClassType::Enum)
        } else {
            Err(self.error("Expected interface|class|enum"))
        }
    }

    fn parse_inheritance(&mut self, spec: &mut ClassSpecification) -> Result<(), ConfigError> {
        self.skip_whitespace();
        if self.accept_string("implements") {
            spec.inheritance_is_extends = false;
        } else if self.accept_string("extends") {
            spec.inheritance_is_extends = true;
        } else {
            return Ok(());
        }
        spec.inheritance_annotation = self.parse_annotation()?;
        let name = self.parse_class_name()?;
        spec.inheritance_class_name = Some(TypeMatcher::create(&name, &self.factory));
        Ok(())
    }

    fn parse_member_rules(
        &mut self,
        spec: &mut ClassSpecification,
        allow_value_specification: bool,
    ) -> Result<(), ConfigError> {
        self.skip_whitespace();
        if !self.eof() && self.accept_char('{') {
            while let Some(rule) = self.parse_member_rule(allow_value_specification)? {
                spec.member_rules.push(rule);
            }
            self.skip_whitespace();
            self.expect_char('}')?;
        }
        Ok(())
    }

    fn parse_member_rule(
        &mut self,
        allow_value_specification: bool,
    ) -> Result<Option<MemberRule>, ConfigError> {
        let mut rule = MemberRule {
            annotation: None,
            access_flags: AccessFlags::default(),
            negated_access_flags: AccessFlags::default(),
            rule_type: MemberRuleType::All,
            name: None,
            type_matcher: None,
            arguments: None,
            return_value: None,
        };
        self.skip_whitespace();
        rule.annotation = self.parse_annotation()?;
        self.parse_member_access_flags(&mut rule);
        let valid = self.parse_member_pattern(&mut rule, allow_value_specification)?;
        if valid {
            self.skip_whitespace();
            self.expect_char(';')?;
            Ok(Some(rule))
        } else {
            Ok(None)
        }
    }

    fn parse_member_access_flags(&mut self, rule: &mut MemberRule) {
        loop {
            let negated = self.parse_negation();
            self.skip_whitespace();
            let flag = if self.accept_string("abstract") {
                AccessFlags::ABSTRACT
            } else if self.accept_string("final") {
                AccessFlags::FINAL
            } else if self.accept_string("native") {
                AccessFlags::NATIVE
            } else if self.accept_string("public") {
                AccessFlags::PUBLIC
            } else if self.accept_string("private") {
                AccessFlags::PRIVATE
            } else if self.accept_string("protected") {
                AccessFlags::PROTECTED
            } else if self.accept_string("synchronized") {
                AccessFlags::SYNCHRONIZED
            } else if self.accept_string("static") {
                AccessFlags::STATIC
            } else if self.accept_string("strictfp") {
                AccessFlags::STRICT
            } else if self.accept_string("transient") {
                AccessFlags::TRANSIENT
            } else if self.accept_string("volatile") {
                AccessFlags::VOLATILE
            } else {
                if negated {
                    self.position -= 1;
                }
                return;
            };
            if negated {
                rule.negated_access_flags.set(flag);
            } else {
                rule.access_flags.set(flag);
            }
        }
    }

    fn parse_member_pattern(
        &mut self,
        rule: &mut MemberRule,
        allow_value_specification: bool,
    ) -> Result<bool, ConfigError> {
        self.skip_whitespace();
        if self.accept_string("<methods>") {
            rule.rule_type = MemberRuleType::AllMethods;
            return Ok(true);
        }
        if self.accept_string("<fields>") {
            rule.rule_type = MemberRuleType::AllFields;
            return Ok(true);
        }
        if self.accept_string("<init>") {
            rule.rule_type = MemberRuleType::Init;
            rule.name = Some(NamePattern::new("<init>"));
            rule.arguments = self.parse_argument_list()?;
            return Ok(true);
        }
        let Some(first) = self.accept_class_name() else {
            return Ok(false);
        };
        self.skip_whitespace();
        if first == "*" && self.has_next_char(';') {
            rule.rule_type = MemberRuleType::All;
            return Ok(true);
        }
        if self.has_next_char('(') {
            rule.rule_type = MemberRuleType::Constructor;
            rule.name = Some(NamePattern::new(&first));
            rule.arguments = self.parse_argument_list()?;
            return Ok(true);
        }
        let Some(second) = self.accept_class_name() else {
            return Err(self.error("Expected field or method name"));
        };
        self.skip_whitespace();
        if self.has_next_char('(') {
            rule.rule_type = MemberRuleType::Method;
            rule.name = Some(NamePattern::new(&second));
            rule.type_matcher = Some(TypeMatcher::create(&first, &self.factory));
            rule.arguments = self.parse_argument_list()?;
        } else {
            rule.rule_type = MemberRuleType::Field;
            rule.name = Some(NamePattern::new(&second));
            rule.type_matcher = Some(TypeMatcher::create(&first, &self.factory));
        }
        self.skip_whitespace();
        if self.accept_string("return") {
            self.skip_whitespace();
            if self.accept_string("true") {
                rule.return_value = Some(ReturnValue::Boolean(true));
            } else if self.accept_string("false") {
                rule.return_value = Some(ReturnValue::Boolean(false));
            } else if let Some(min) = self.accept_integer() {
                let mut max = min;
                self.skip_whitespace();
                if self.accept_string("..") {
                    max = self
                        .accept_integer()
                        .ok_or_else(|| self.error("Expected integer value"))?;
                }
                if !allow_value_specification {
                    return Err(self.error("Unexpected value specification"));
                }
                rule.return_value = Some(ReturnValue::Interval(min, max));
            } else if let Some(qualified) = self.accept_field_name() {
                let Some(matcher) = &rule.type_matcher else {
                    return Err(self.error("Expected specific type"));
                };
                let Some(field_type) = matcher.specific_type() else {
                    return Err(self.error("Expected specific type"));
                };
                let Some(dot) = qualified.rfind('.') else {
                    return Err(self.error("Expected qualified field name"));
                };
                let holder_descriptor = crate::graph::java_to_descriptor(&qualified[..dot]);
                let holder = self.factory.create_type(&holder_descriptor);
                let name = self.factory.create_string(&qualified[dot + 1..]);
                let field = self.factory.create_field(holder, name, field_type);
                rule.return_value = Some(ReturnValue::Field(field));
            } else {
                return Err(self.error("Expected return value"));
            }
        }
        Ok(true)
    }

    fn parse_argument_list(&mut self) -> Result<Option<Vec<TypeMatcher>>, ConfigError> {
        let mut arguments = Vec::new();
        self.skip_whitespace();
        self.expect_char('(')?;
        self.skip_whitespace();
        if self.accept_char(')') {
            return Ok(Some(arguments));
        }
        if self.accept_string("...") {
            self.skip_whitespace();
            self.expect_char(')')?;
            return Ok(None);
        }
        loop {
            let name = self.parse_class_name()?;
            arguments.push(TypeMatcher::create(&name, &self.factory));
            self.skip_whitespace();
            if !self.accept_char(',') {
                break;
            }
        }
        self.skip_whitespace();
        self.expect_char(')')?;
        Ok(Some(arguments))
    }

    fn parse_file_name(&mut self) -> Result<PathBuf, ConfigError> {
        self.skip_whitespace();
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ':' {
                break;
            }
            self.position += c.len_utf8();
        }
        if start == self.position {
            return Err(self.error("File name expected"));
        }
        Ok(PathBuf::from(&self.contents[start..self.position]))
    }

    fn parse_class_path(&mut self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut paths = vec![self.parse_file_name()?];
        while self.accept_char(':') {
            paths.push(self.parse_file_name()?);
        }
        Ok(paths)
    }

    fn parse_class_names(&mut self) -> Result<Vec<TypeMatcher>, ConfigError> {
        let mut names = Vec::new();
        loop {
            self.skip_whitespace();
            if self.accept_char('!') {
                return Err(self.error("Negated filters are not supported"));
            }
            let name = self.parse_class_name()?;
            names.push(TypeMatcher::create(&name, &self.factory));
            self.skip_whitespace();
            if !self.accept_char(',') {
                break;
            }
        }
        Ok(names)
    }

    fn parse_class_name(&mut self) -> Result<String, ConfigError> {
        self.accept_class_name()
            .ok_or_else(|| self.error("Class name expected"))
    }

    // Cursor primitives.

    fn eof(&self) -> bool {
        self.position >= self.contents.len()
    }

    fn peek(&self) -> Option<char> {
        self.contents[self.position..].chars().next()
    }

    fn has_next_char(&self, c: char) -> bool {
        self.peek() == Some(c)
    }

    fn optional_argument_given(&self) -> bool {
        !self.eof() && !self.has_next_char('-')
    }

    fn accept_char(&mut self, c: char) -> bool {
        if self.has_next_char(c) {
            self.position += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn expect_char(&mut self, c: char) -> Result<(), ConfigError> {
        if self.accept_char(c) {
            Ok(())
        } else {
            Err(self.error(format!("Expected char '{c}'")))
        }
    }

    fn accept_string(&mut self, expected: &str) -> bool {
        if self.contents[self.position..].starts_with(expected) {
            self.position += expected.len();
            true
        } else {
            false
        }
    }

    fn accept_integer(&mut self) -> Option<i64> {
        self.skip_whitespace();
        let start = self.position;
        if self.has_next_char('-') {
            self.position += 1;
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.position += 1;
            } else {
                break;
            }
        }
        let text = &self.contents[start..self.position];
        match text.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                self.position = start;
                None
            }
        }
    }

    fn accept_class_name(&mut self) -> Option<String> {
        self.skip_whitespace();
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric()
                || matches!(c, '.' | '*' | '?' | '%' | '[' | ']' | '_' | '$' | '<' | '>')
            {
                self.position += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.position {
            None
        } else {
            Some(self.contents[start..self.position].to_string())
        }
    }

    fn accept_field_name(&mut self) -> Option<String> {
        self.skip_whitespace();
        let start = self.position;
        while let Some(c) = self.peek() {
            let first = self.position == start;
            let valid = if first {
                c.is_alphabetic() || c == '_' || c == '$'
            } else {
                c.is_alphanumeric() || matches!(c, '.' | '_' | '$')
            };
            if valid {
                self.position += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.position {
            None
        } else {
            Some(self.contents[start..self.position].to_string())
        }
    }

    fn accept_pattern_list(&mut self) -> Option<String> {
        self.skip_whitespace();
        let start = self.position;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '!' | '*' | ',' | '_' | '$') {
                self.position += c.len_utf8();
            } else {
                break;
            }
        }
        if start == self.position {
            None
        } else {
            Some(self.contents[start..self.position].to_string())
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            while let Some(c) = self.peek() {
                if c.is_whitespace() {
                    self.position += c.len_utf8();
                } else {
                    break;
                }
            }
            if self.has_next_char('#') {
                while let Some(c) = self.peek() {
                    self.position += c.len_utf8();
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                return;
            }
        }
    }

    fn line_and_column(&self) -> (usize, usize) {
        let upto = &self.contents[..self.position];
        let line = upto.matches('\n').count() + 1;
        let column = upto.rfind('\n').map(|i| self.position - i).unwrap_or(self.position + 1);
        (line, column)
    }

    fn error(&self, message: impl Into<String>) -> ConfigError {
        let (line, column) = self.line_and_column();
        ConfigError {
            message: message.into(),
            source_code: NamedSource::new(self.name.clone(), self.contents.clone()),
            span: (self.position.min(self.contents.len()), 0).into(),
            line,
            column,
        }
    }
}

fn read_dictionary(path: &Path, parser: &SourceParser) -> Result<Vec<String>, ConfigError> {
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        parser.base_directory.join(path)
    };
    let contents = std::fs::read_to_string(&resolved).map_err(|e| {
        parser.error(format!(
            "Dictionary file '{}' not readable: {e}",
            resolved.display()
        ))
    })?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Configuration {
        let factory = Arc::new(ItemFactory::new());
        let mut parser = ConfigurationParser::new(factory);
        parser.parse_string("test.pro", source).unwrap();
        parser.finish()
    }

    fn parse_err(source: &str) -> ConfigError {
        let factory = Arc::new(ItemFactory::new());
        let mut parser = ConfigurationParser::new(factory);
        parser.parse_string("test.pro", source).unwrap_err()
    }

    #[test]
    fn parses_basic_keep_rule() {
        let config = parse("-keep class com.example.Main { *; }");
        assert_eq!(config.rules.len(), 1);
        let Rule::Keep { keep_type, spec, .. } = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(*keep_type, KeepRuleType::Keep);
        assert_eq!(spec.class_names.len(), 1);
        assert_eq!(spec.member_rules.len(), 1);
        assert_eq!(spec.member_rules[0].rule_type, MemberRuleType::All);
    }

    #[test]
    fn bare_keep_implies_default_constructor_rule() {
        let config = parse("-keep class com.example.Main");
        let Rule::Keep { spec, .. } = &config.rules[0] else {
            panic!("expected keep rule");
        };
        assert_eq!(spec.member_rules.len(), 1);
        assert_eq!(spec.member_rules[0].rule_type, MemberRuleType::Init);
    }

    #[test]
    fn parses_keepclassmembers_and_modifiers() {
        let config = parse(
            "-keepclassmembers,allowobfuscation class * { <methods>; }",
        );
        let Rule::Keep {
            keep_type,
            modifiers,
            spec,
        } = &config.rules[0]
        else {
            panic!("expected keep rule");
        };
        assert_eq!(*keep_type, KeepRuleType::KeepClassMembers);
        assert!(modifiers.allows_obfuscation);
        assert_eq!(spec.member_rules[0].rule_type, MemberRuleType::AllMethods);
    }

    #[test]
    fn parses_inheritance_clause() {
        let config = parse("-keep class * extends android.app.Activity");
        let spec = config.rules[0].spec();
        assert!(spec.inheritance_is_extends);
        assert!(spec.inheritance_class_name.is_some());
    }

    #[test]
    fn parses_assume_values_interval() {
        let config = parse("-assumevalues class com.example.Foo { int value() return 1..5; }");
        let Rule::AssumeValues(spec) = &config.rules[0] else {
            panic!("expected assumevalues rule");
        };
        assert_eq!(
            spec.member_rules[0].return_value,
            Some(ReturnValue::Interval(1, 5))
        );
    }

    #[test]
    fn value_specification_rejected_outside_assume_rules() {
        let err = parse_err("-keep class com.example.Foo { int value() return 1..5; }");
        assert!(err.message.contains("Unexpected value specification"));
    }

    #[test]
    fn global_flags() {
        let config = parse(
            "-dontshrink\n-dontobfuscate\n-dontoptimize\n-ignorewarnings\n-verbose\n-allowaccessmodification",
        );
        assert!(!config.shrink);
        assert!(!config.obfuscate);
        assert!(!config.optimize);
        assert!(config.ignore_warnings);
        assert!(config.verbose);
        assert!(config.allow_access_modification);
    }

    #[test]
    fn package_obfuscation_modes() {
        let config = parse("-repackageclasses 'pkg'");
        assert_eq!(
            config.package_obfuscation_mode,
            PackageObfuscationMode::Repackage
        );
        assert_eq!(config.package_prefix, "pkg");

        let config = parse("-flattenpackagehierarchy");
        assert_eq!(
            config.package_obfuscation_mode,
            PackageObfuscationMode::Flatten
        );
    }

    #[test]
    fn unknown_option_is_an_error_with_location() {
        let err = parse_err("-keep class A\n-nosuchoption");
        assert_eq!(err.message, "Unknown option");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn unsupported_option_is_fatal() {
        let err = parse_err("-skipnonpubliclibraryclasses");
        assert!(err.message.contains("Unsupported option"));
    }

    #[test]
    fn ignored_options_are_skipped() {
        let config = parse("-dontusemixedcaseclassnames\n-target 1.8\n-keep class A");
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn keepattributes_accumulates_patterns() {
        let config = parse("-keepattributes Signature,InnerClasses");
        assert!(config.keeps_attribute("Signature"));
        assert!(config.keeps_attribute("InnerClasses"));
        assert!(!config.keeps_attribute("SourceFile"));
    }

    #[test]
    fn comments_are_skipped() {
        let config = parse("# header comment\n-keep class A # trailing\n");
        assert_eq!(config.rules.len(), 1);
    }

    #[test]
    fn dontwarn_patterns() {
        let config = parse("-dontwarn com.missing.**,org.other.Thing");
        assert_eq!(config.dont_warn_patterns.len(), 2);
    }
}
