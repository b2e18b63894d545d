// Parser for JVM generic signatures (JVMS 4.7.9.1), event-based.
//
// The parser forwards structure to a SignatureAction: raw symbols,
// identifiers (type variables, parameter names), qualified class names and
// inner-class name suffixes. The class minifier's action re-emits the
// signature with every class name renamed.

use std::fmt;

use crate::graph::TypeId;

pub trait SignatureAction {
    fn parsed_symbol(&mut self, symbol: char);
    fn parsed_identifier(&mut self, identifier: &str);
    /// A qualified binary class name (`a/b/C`). Returns the parsed type so
    /// subsequent inner-class suffixes can be resolved against it.
    fn parsed_type_name(&mut self, name: &str) -> TypeId;
    /// An inner-class suffix (`.Inner`) of the given enclosing type.
    fn parsed_inner_type_name(&mut self, enclosing: TypeId, name: &str) -> TypeId;
}

#[derive(Debug)]
pub struct SignatureParseError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for SignatureParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

pub struct SignatureParser<'a, A: SignatureAction> {
    action: &'a mut A,
    chars: Vec<char>,
    position: usize,
}

impl<'a, A: SignatureAction> SignatureParser<'a, A> {
    pub fn new(action: &'a mut A) -> Self {
        SignatureParser {
            action,
            chars: Vec::new(),
            position: 0,
        }
    }

    /// ClassSignature: TypeParams? SuperclassSignature SuperinterfaceSignature*
    pub fn parse_class_signature(&mut self, signature: &str) -> Result<(), SignatureParseError> {
        self.init(signature);
        self.parse_optional_type_parameters()?;
        // Superclass, then superinterfaces.
        self.parse_class_type_signature()?;
        while !self.eof() {
            self.parse_class_type_signature()?;
        }
        Ok(())
    }

    /// MethodTypeSignature: TypeParams? `(` TypeSignature* `)` ReturnType ThrowsSignature*
    pub fn parse_method_signature(&mut self, signature: &str) -> Result<(), SignatureParseError> {
        self.init(signature);
        self.parse_optional_type_parameters()?;
        self.expect('(')?;
        while self.peek() != Some(')') {
            self.parse_type_signature()?;
        }
        self.expect(')')?;
        if self.peek() == Some('V') {
            self.advance_symbol();
        } else {
            self.parse_type_signature()?;
        }
        while self.peek() == Some('^') {
            self.advance_symbol();
            if self.peek() == Some('T') {
                self.parse_type_variable()?;
            } else {
                self.parse_class_type_signature()?;
            }
        }
        self.ensure_eof()
    }

    /// FieldTypeSignature.
    pub fn parse_field_signature(&mut self, signature: &str) -> Result<(), SignatureParseError> {
        self.init(signature);
        self.parse_field_type_signature()?;
        self.ensure_eof()
    }

    fn init(&mut self, signature: &str) {
        self.chars = signature.chars().collect();
        self.position = 0;
    }

    fn parse_optional_type_parameters(&mut self) -> Result<(), SignatureParseError> {
        if self.peek() != Some('<') {
            return Ok(());
        }
        self.advance_symbol();
        while self.peek() != Some('>') {
            let identifier = self.parse_identifier()?;
            self.action.parsed_identifier(&identifier);
            // ClassBound: ':' FieldTypeSignature? InterfaceBound*: (':' FieldTypeSignature)*
            self.expect(':')?;
            match self.peek() {
                Some('L') | Some('[') | Some('T') => self.parse_field_type_signature()?,
                _ => {}
            }
            while self.peek() == Some(':') {
                self.advance_symbol();
                self.parse_field_type_signature()?;
            }
        }
        self.advance_symbol();
        Ok(())
    }

    fn parse_type_signature(&mut self) -> Result<(), SignatureParseError> {
        match self.peek() {
            Some('L') | Some('[') | Some('T') => self.parse_field_type_signature(),
            Some(c) if "ZBSCIJFD".contains(c) => {
                self.advance_symbol();
                Ok(())
            }
            other => Err(self.error(format!("expected type signature, found {other:?}"))),
        }
    }

    fn parse_field_type_signature(&mut self) -> Result<(), SignatureParseError> {
        match self.peek() {
            Some('L') => self.parse_class_type_signature(),
            Some('[') => {
                self.advance_symbol();
                self.parse_type_signature()
            }
            Some('T') => self.parse_type_variable(),
            other => Err(self.error(format!("expected field type signature, found {other:?}"))),
        }
    }

    fn parse_type_variable(&mut self) -> Result<(), SignatureParseError> {
        self.expect('T')?;
        let identifier = self.parse_identifier()?;
        self.action.parsed_identifier(&identifier);
        self.expect(';')
    }

    fn parse_class_type_signature(&mut self) -> Result<(), SignatureParseError> {
        self.expect('L')?;
        // Qualified name up to type arguments, suffix or terminator.
        let mut name = String::new();
        loop {
            let part = self.parse_identifier()?;
            name.push_str(&part);
            if self.peek() == Some('/') {
                self.position += 1;
                name.push('/');
            } else {
                break;
            }
        }
        let mut enclosing = self.action.parsed_type_name(&name);
        if self.peek() == Some('<') {
            self.parse_type_arguments()?;
        }
        while self.peek() == Some('.') {
            self.advance_symbol();
            let inner = self.parse_identifier()?;
            enclosing = self.action.parsed_inner_type_name(enclosing, &inner);
            if self.peek() == Some('<') {
                self.parse_type_arguments()?;
            }
        }
        self.expect(';')
    }

    fn parse_type_arguments(&mut self) -> Result<(), SignatureParseError> {
        self.expect('<')?;
        while self.peek() != Some('>') {
            match self.peek() {
                Some('*') => self.advance_symbol(),
                Some('+') | Some('-') => {
                    self.advance_symbol();
                    self.parse_field_type_signature()?;
                }
                Some(_) => self.parse_field_type_signature()?,
                None => return Err(self.error("unterminated type arguments".to_string())),
            }
        }
        self.advance_symbol();
        Ok(())
    }

    fn parse_identifier(&mut self) -> Result<String, SignatureParseError> {
        let start = self.position;
        while let Some(&c) = self.chars.get(self.position) {
            if matches!(c, '.' | ';' | '[' | '/' | '<' | '>' | ':' | '^') {
                break;
            }
            self.position += 1;
        }
        if start == self.position {
            return Err(self.error("identifier expected".to_string()));
        }
        Ok(self.chars[start..self.position].iter().collect())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn eof(&self) -> bool {
        self.position >= self.chars.len()
    }

    fn ensure_eof(&self) -> Result<(), SignatureParseError> {
        if self.eof() {
            Ok(())
        } else {
            Err(self.error("trailing input".to_string()))
        }
    }

    fn advance_symbol(&mut self) {
        if let Some(&c) = self.chars.get(self.position) {
            self.action.parsed_symbol(c);
            self.position += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), SignatureParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.advance_symbol();
                Ok(())
            }
            other => Err(self.error(format!("expected '{expected}', found {other:?}"))),
        }
    }

    fn error(&self, message: String) -> SignatureParseError {
        SignatureParseError {
            message,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ItemFactory;

    /// Echoes the signature unchanged; checks the parser covers the grammar.
    struct Echo<'f> {
        factory: &'f ItemFactory,
        out: String,
    }

    impl SignatureAction for Echo<'_> {
        fn parsed_symbol(&mut self, symbol: char) {
            self.out.push(symbol);
        }
        fn parsed_identifier(&mut self, identifier: &str) {
            self.out.push_str(identifier);
        }
        fn parsed_type_name(&mut self, name: &str) -> TypeId {
            self.out.push_str(name);
            self.factory.create_type(&format!("L{name};"))
        }
        fn parsed_inner_type_name(&mut self, _enclosing: TypeId, name: &str) -> TypeId {
            self.out.push_str(name);
            self.factory.create_type(&format!("L{name};"))
        }
    }

    fn echo(kind: &str, signature: &str) -> String {
        let factory = ItemFactory::new();
        let mut action = Echo {
            factory: &factory,
            out: String::new(),
        };
        let mut parser = SignatureParser::new(&mut action);
        let result = match kind {
            "class" => parser.parse_class_signature(signature),
            "method" => parser.parse_method_signature(signature),
            _ => parser.parse_field_signature(signature),
        };
        result.unwrap();
        action.out
    }

    #[test]
    fn class_signature_round_trips() {
        let sig = "<T:Ljava/lang/Object;>Ljava/util/AbstractList<TT;>;Ljava/io/Serializable;";
        assert_eq!(echo("class", sig), sig);
    }

    #[test]
    fn method_signature_round_trips() {
        let sig = "<X:Ljava/lang/Object;>(TX;Ljava/util/List<+TX;>;I)TX;^Ljava/io/IOException;";
        assert_eq!(echo("method", sig), sig);
    }

    #[test]
    fn field_signature_with_wildcards() {
        let sig = "Ljava/util/Map<Ljava/lang/String;*>;";
        assert_eq!(echo("field", sig), sig);
    }

    #[test]
    fn inner_class_suffix_is_reported_separately() {
        let sig = "Ljava/util/Map<TK;TV;>.Entry<TK;TV;>;";
        assert_eq!(echo("field", sig), sig);
    }

    #[test]
    fn malformed_signature_is_an_error() {
        let factory = ItemFactory::new();
        let mut action = Echo {
            factory: &factory,
            out: String::new(),
        };
        let mut parser = SignatureParser::new(&mut action);
        assert!(parser.parse_field_signature("Lunterminated").is_err());
    }
}
