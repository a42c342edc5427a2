//! Token set for the FlowQL DSL (spec §4.1).

use flowql_core::error::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Create,
    Or,
    Replace,
    If,
    Not,
    Exists,
    Stream,
    Flow,
    Delete,
    Insert,
    Into,
    Flush,
    List,
    Info,
    Subscribe,
    Unsubscribe,
    Ttl,
    As,
    From,
    Where,
    Select,
    Project,
    Scan,
    Step,
    Summarize,
    By,
    Over,
    Emit,
    Every,
    When,
    On,
    Change,
    Group,
    Update,
    Using,
    InsertInto,
    Collect,
    Iff,
    True,
    False,
    Null,
    Streams,
    Flows,
}

impl Keyword {
    /// All keywords, used by the lexer to build its lookup table.
    pub const ALL: &'static [(&'static str, Keyword)] = &[
        ("create", Keyword::Create),
        ("or", Keyword::Or),
        ("replace", Keyword::Replace),
        ("if", Keyword::If),
        ("not", Keyword::Not),
        ("exists", Keyword::Exists),
        ("stream", Keyword::Stream),
        ("flow", Keyword::Flow),
        ("delete", Keyword::Delete),
        ("insert", Keyword::Insert),
        ("into", Keyword::Into),
        ("flush", Keyword::Flush),
        ("list", Keyword::List),
        ("info", Keyword::Info),
        ("subscribe", Keyword::Subscribe),
        ("unsubscribe", Keyword::Unsubscribe),
        ("ttl", Keyword::Ttl),
        ("as", Keyword::As),
        ("from", Keyword::From),
        ("where", Keyword::Where),
        ("select", Keyword::Select),
        ("project", Keyword::Project),
        ("scan", Keyword::Scan),
        ("step", Keyword::Step),
        ("summarize", Keyword::Summarize),
        ("by", Keyword::By),
        ("over", Keyword::Over),
        ("emit", Keyword::Emit),
        ("every", Keyword::Every),
        ("when", Keyword::When),
        ("on", Keyword::On),
        ("change", Keyword::Change),
        ("group", Keyword::Group),
        ("update", Keyword::Update),
        ("using", Keyword::Using),
        ("insert_into", Keyword::InsertInto),
        ("collect", Keyword::Collect),
        ("iff", Keyword::Iff),
        ("true", Keyword::True),
        ("false", Keyword::False),
        ("null", Keyword::Null),
        ("streams", Keyword::Streams),
        ("flows", Keyword::Flows),
    ];

    pub fn text(self) -> &'static str {
        Self::ALL.iter().find(|(_, k)| *k == self).map(|(s, _)| *s).unwrap()
    }

    pub fn lookup(ident: &str) -> Option<Keyword> {
        Self::ALL.iter().find(|(s, _)| *s == ident).map(|(_, k)| *k)
    }
}

/// Names of window constructor functions, recognized in `over name = NAME(...)`.
pub const WINDOW_FNS: &[&str] = &[
    "tumbling_window",
    "tumbling_window_by",
    "hopping_window",
    "hopping_window_by",
    "sliding_window",
    "sliding_window_by",
    "count_window",
    "session_window",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident(String),
    String(String),
    Number(f64),
    Duration(u64, String),
    Pipe,          // |
    OrOr,          // ||
    AndAnd,        // &&
    EqEq,          // ==
    NotEq,         // !=
    Lt,
    Gt,
    LtEq,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Eq,        // =
    FatArrow,  // =>
    Question,  // ?
    Colon,     // :
    DotDotDot, // ...
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}
