//! Static analysis of regular expressions for catastrophic backtracking
//! (ReDoS: regular expression denial of service).
//!
//! Given a pattern, the analyzer decides whether a backtracking matcher in
//! the style of JavaScript's can be driven into exponential or polynomial
//! runtime by a crafted input, and if so synthesizes such an input. The
//! pattern is never executed; the verdict is reached purely by inspecting
//! automata derived from it.
//!
//! Based on:
//! - Weber & Seidl, "On the degree of ambiguity of finite automata"
//!   (Theoretical Computer Science, 1991), which characterizes exponential
//!   and polynomial ambiguity by structural properties of strongly
//!   connected components.
//! - Weideman, van der Merwe, Berglund & Watson, "Analyzing matching time
//!   behavior of backtracking regular expression matchers by exploiting
//!   their counterparts in automata theory" (CIAA 2016), which connects
//!   those ambiguity criteria to backtracking matchers via a prioritized
//!   NFA pruned against the reverse DFA.
//!
//! # Pipeline
//!
//! [`analyze`] runs the stages in a fixed order, each an immutable value
//! produced by one builder:
//!
//! 1. parse the pattern to an AST (`regex-syntax`, AST level only);
//! 2. collect the finite alphabet of symbols the pattern distinguishes;
//! 3. build a prioritized epsilon-NFA ([`EpsilonNfa::build`]), modeling
//!    the search loop of an unanchored match with wrapper loops;
//! 4. eliminate epsilon edges ([`EpsilonNfa::eliminate`]), keeping the
//!    per-symbol destination order that encodes backtracking priority;
//! 5. reverse ([`OrderedNfa::reverse`]) and determinize
//!    ([`Dfa::determinize`]) to learn, for every suffix position, which
//!    NFA states can still reach acceptance;
//! 6. prune ([`PrunedNfa::build`]): pair every NFA state with a reverse
//!    DFA context and drop the alternatives a backtracking engine would
//!    never settle on in that context;
//! 7. decompose into strongly connected components
//!    ([`strongly_connected_components`]) and search their pairwise
//!    products for EDA (exponential degree of ambiguity) and their triple
//!    products for IDA (infinite/polynomial degree of ambiguity);
//! 8. turn a witness into an attack string ([`Attacker`]): a prefix
//!    reaching the ambiguous loop, a pumpable core repeated many times,
//!    and a suffix that forces the engine to explore every doomed path.
//!
//! # The alphabet abstraction
//!
//! The analysis never works over all of Unicode. The alphabet is the set
//! of characters that literally appear in the pattern (case-folded under
//! the `i` flag), plus one sentinel symbol standing for every other input
//! character. Character classes and `.` resolve to subsets of this finite
//! alphabet; the sentinel joins a class's set exactly when the class
//! matches at least one character outside the concrete alphabet. The
//! abstraction is sound for the ambiguity search because ambiguity is a
//! property of which edges coexist, not of which exact characters label
//! them, but it is deliberately coarse: all "other" characters are
//! interchangeable, so a pattern distinguishing two such characters only
//! through negated classes can analyze as safe.
//!
//! # Priority and pruning
//!
//! Destination order in the epsilon-NFA and its epsilon-free form is
//! semantically meaningful: it is the order in which a backtracking
//! engine tries alternatives (greedy loops enter before exiting, lazy
//! loops exit before entering, alternation in source order). Epsilon
//! elimination may record the same (symbol, destination) item twice when
//! two distinct epsilon paths reach the same edge; those duplicates are
//! the raw material of ambiguity and must not be collapsed. The reverse
//! DFA is the other half: a pair (q, Q) in the pruned NFA means "the
//! engine is at NFA state q and the rest of the input is one that the
//! states in Q, and only those, can accept." Within such a context a
//! lower-priority alternative sitting after one that is known to succeed
//! is unreachable for the engine and is pruned, which removes the benign
//! ambiguity a plain product search would drown in.
//!
//! # Attack strings
//!
//! A finding carries an optional attack string shaped prefix + pump
//! repeated [`PUMP_REPEAT`] times + suffix. The suffix is found by a
//! subset walk to a set of pruned states from which acceptance is
//! impossible; when the pattern's language leaves no such set (it matches
//! every completion), the finding stands but the attack is `None`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::slice;

use indexmap::{IndexMap, IndexSet};
use regex_syntax::ast::{
    self, Ast, AssertionKind, ClassPerlKind, ClassSet, ClassSetItem, GroupKind, RepetitionKind,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A pattern feature the analysis recognizes but does not model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Construct {
    /// `{n}`, `{n,}` and `{n,m}` repetition counts.
    BoundedRepetition,
    /// `\b` and `\B` assertions.
    WordBoundary,
    /// `\p{..}` and `\P{..}` escapes.
    UnicodeProperty,
    /// `[[:alpha:]]` and friends.
    PosixClass,
    /// Class set operations such as intersection and difference.
    ClassSetOperation,
    /// A bracketed class nested inside another bracketed class.
    NestedClass,
    /// `(?i)` and `(?i:..)` scoped flag settings.
    InlineFlags,
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Construct::BoundedRepetition => "bounded repetition count",
            Construct::WordBoundary => "word boundary assertion",
            Construct::UnicodeProperty => "Unicode property escape",
            Construct::PosixClass => "POSIX character class",
            Construct::ClassSetOperation => "character class set operation",
            Construct::NestedClass => "nested character class",
            Construct::InlineFlags => "inline flag setting",
        };
        f.write_str(name)
    }
}

/// Errors reported by [`analyze`] and the stage builders.
#[derive(Clone, Debug)]
pub enum Error {
    /// The pattern does not parse. Carries the parser's own diagnostic,
    /// which also covers backreferences and lookaround (rejected at the
    /// syntax level).
    Syntax(Box<ast::Error>),
    /// The pattern parses but uses a construct the analysis cannot model.
    Unsupported(Construct),
    /// `^` or `$` somewhere other than the start or end of a top-level
    /// sequence or alternation branch.
    MisplacedAnchor,
    /// An unknown letter in a flag string.
    UnknownFlag(char),
    /// An internal contract of the pipeline was broken. Not reachable
    /// from any pattern; reported instead of panicking.
    Invariant(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Syntax(e) => write!(f, "{e}"),
            Error::Unsupported(c) => write!(f, "unsupported construct: {c}"),
            Error::MisplacedAnchor => {
                write!(f, "anchor is not at the start or end of the pattern")
            }
            Error::UnknownFlag(c) => write!(f, "unknown flag: {c:?}"),
            Error::Invariant(msg) => write!(f, "internal invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

/// The pattern flags that influence the analysis.
///
/// Only case-insensitivity and dot-all change the derived automata. The
/// remaining JavaScript flags (`d`, `g`, `m`, `u`, `v`, `y`) select
/// matcher behavior that is irrelevant to backtracking blowup, so
/// [`Flags::from_js`] accepts and ignores them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    /// `i`: case-insensitive matching. ASCII letters are folded to
    /// lowercase throughout the alphabet and all symbol sets.
    pub ignore_case: bool,
    /// `s`: `.` also matches `\n`.
    pub dot_all: bool,
}

impl Flags {
    /// Parses a JavaScript-style flag string such as `"is"`.
    pub fn from_js(flags: &str) -> Result<Flags, Error> {
        let mut out = Flags::default();
        for c in flags.chars() {
            match c {
                'i' => out.ignore_case = true,
                's' => out.dot_all = true,
                'd' | 'g' | 'm' | 'u' | 'v' | 'y' => {}
                other => return Err(Error::UnknownFlag(other)),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Symbols and the alphabet
// ---------------------------------------------------------------------------

/// One input symbol of the analysis alphabet.
///
/// `Other` is the sentinel standing for every character the pattern does
/// not distinguish by name. The derived `Ord` keeps concrete characters
/// in scalar order with the sentinel last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Symbol {
    Char(char),
    Other,
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Char(c) if c.is_control() || c.is_whitespace() => {
                write!(f, "U+{:04X}", *c as u32)
            }
            Symbol::Char(c) => write!(f, "{c}"),
            Symbol::Other => f.write_str("∗"),
        }
    }
}

/// The finite alphabet a pattern is analyzed over: every character that
/// literally appears in the pattern (case-folded under `i`), plus the
/// sentinel. Fixed once the epsilon-NFA is built; all later stages reuse
/// it unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alphabet {
    /// Sorted, deduplicated, always ending with `Symbol::Other`.
    symbols: Box<[Symbol]>,
    folded: bool,
}

impl Alphabet {
    /// Collects the alphabet from a parsed pattern. Walks the whole AST,
    /// including subtrees that a later build step will reject, which is
    /// harmless: an extra character only refines the partition.
    pub fn collect(ast: &Ast, flags: Flags) -> Alphabet {
        let mut chars = BTreeSet::new();
        collect_chars(ast, flags, &mut chars);
        let mut symbols: Vec<Symbol> = chars.into_iter().map(Symbol::Char).collect();
        symbols.push(Symbol::Other);
        Alphabet {
            symbols: symbols.into_boxed_slice(),
            folded: flags.ignore_case,
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        // The sentinel is always present.
        false
    }

    /// Whether `c` is a concrete (non-sentinel) symbol of the alphabet.
    /// Folds `c` first when the alphabet was built under `i`.
    pub fn contains_char(&self, c: char) -> bool {
        let c = if self.folded { c.to_ascii_lowercase() } else { c };
        self.concrete().any(|a| a == c)
    }

    /// The concrete characters, in scalar order.
    fn concrete(&self) -> impl Iterator<Item = char> + '_ {
        self.symbols.iter().filter_map(|s| match s {
            Symbol::Char(c) => Some(*c),
            Symbol::Other => None,
        })
    }

    fn concrete_in_range(&self, lo: u32, hi: u32) -> u64 {
        self.concrete()
            .filter(|&c| lo <= c as u32 && c as u32 <= hi)
            .count() as u64
    }

    /// The set of every alphabet symbol, sentinel included.
    pub fn full_set(&self) -> SymbolSet {
        SymbolSet {
            symbols: self.symbols.clone(),
        }
    }
}

/// A resolved subset of the alphabet, as carried on epsilon-NFA edges.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SymbolSet {
    /// Sorted and deduplicated.
    symbols: Box<[Symbol]>,
}

impl SymbolSet {
    fn from_vec(mut symbols: Vec<Symbol>) -> SymbolSet {
        symbols.sort();
        symbols.dedup();
        SymbolSet {
            symbols: symbols.into_boxed_slice(),
        }
    }

    fn singleton(symbol: Symbol) -> SymbolSet {
        SymbolSet {
            symbols: Box::new([symbol]),
        }
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: Symbol) -> bool {
        self.symbols.binary_search(&symbol).is_ok()
    }

    /// Set difference, used for negated classes.
    pub fn subtract(&self, other: &SymbolSet) -> SymbolSet {
        SymbolSet {
            symbols: self
                .symbols
                .iter()
                .copied()
                .filter(|s| !other.contains(*s))
                .collect(),
        }
    }
}

fn fold_case(c: char, flags: Flags) -> char {
    if flags.ignore_case {
        c.to_ascii_lowercase()
    } else {
        c
    }
}

fn swap_ascii_case(c: char) -> char {
    if c.is_ascii_uppercase() {
        c.to_ascii_lowercase()
    } else if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else {
        c
    }
}

fn collect_chars(ast: &Ast, flags: Flags, out: &mut BTreeSet<char>) {
    match ast {
        Ast::Literal(lit) => {
            out.insert(fold_case(lit.c, flags));
        }
        Ast::ClassBracketed(cls) => collect_class_set(&cls.kind, flags, out),
        Ast::Repetition(rep) => collect_chars(&rep.ast, flags, out),
        Ast::Group(group) => collect_chars(&group.ast, flags, out),
        Ast::Alternation(alt) => {
            for branch in &alt.asts {
                collect_chars(branch, flags, out);
            }
        }
        Ast::Concat(concat) => {
            for item in &concat.asts {
                collect_chars(item, flags, out);
            }
        }
        Ast::Empty(_)
        | Ast::Flags(_)
        | Ast::Dot(_)
        | Ast::Assertion(_)
        | Ast::ClassUnicode(_)
        | Ast::ClassPerl(_) => {}
    }
}

fn collect_class_set(set: &ClassSet, flags: Flags, out: &mut BTreeSet<char>) {
    match set {
        ClassSet::Item(item) => collect_class_item(item, flags, out),
        ClassSet::BinaryOp(op) => {
            collect_class_set(&op.lhs, flags, out);
            collect_class_set(&op.rhs, flags, out);
        }
    }
}

fn collect_class_item(
    item: &ClassSetItem,
    flags: Flags,
    out: &mut BTreeSet<char>,
) {
    match item {
        ClassSetItem::Literal(lit) => {
            out.insert(fold_case(lit.c, flags));
        }
        ClassSetItem::Range(range) => {
            out.insert(fold_case(range.start.c, flags));
            out.insert(fold_case(range.end.c, flags));
        }
        ClassSetItem::Union(union) => {
            for item in &union.items {
                collect_class_item(item, flags, out);
            }
        }
        ClassSetItem::Bracketed(cls) => collect_class_set(&cls.kind, flags, out),
        ClassSetItem::Empty(_)
        | ClassSetItem::Ascii(_)
        | ClassSetItem::Unicode(_)
        | ClassSetItem::Perl(_) => {}
    }
}

// ---------------------------------------------------------------------------
// Class resolution
// ---------------------------------------------------------------------------
//
// A class is first flattened to inclusive scalar ranges, then resolved
// against the alphabet: the concrete members it matches, plus the
// sentinel exactly when it matches at least one character outside the
// concrete alphabet. Negated classes subtract their positive resolution
// from the full alphabet, sentinel included.

type ScalarRange = (u32, u32);

const MAX_SCALAR: u32 = 0x10FFFF;

fn perl_base_ranges(kind: &ClassPerlKind) -> &'static [ScalarRange] {
    match kind {
        ClassPerlKind::Digit => &[(0x30, 0x39)],
        ClassPerlKind::Space => &[(0x09, 0x0D), (0x20, 0x20)],
        ClassPerlKind::Word => &[(0x30, 0x39), (0x41, 0x5A), (0x5F, 0x5F), (0x61, 0x7A)],
    }
}

/// Complement over the scalar space, for negated escape classes inside a
/// bracketed class (where set subtraction is not available). `ranges`
/// must be sorted and non-overlapping.
fn complement_ranges(ranges: &[ScalarRange]) -> Vec<ScalarRange> {
    let mut out = Vec::with_capacity(ranges.len() + 1);
    let mut next = 0u32;
    for &(lo, hi) in ranges {
        if lo > next {
            out.push((next, lo - 1));
        }
        next = hi + 1;
    }
    if next <= MAX_SCALAR {
        out.push((next, MAX_SCALAR));
    }
    out
}

fn class_ranges(set: &ClassSet) -> Result<Vec<ScalarRange>, Error> {
    match set {
        ClassSet::Item(item) => {
            let mut out = Vec::new();
            item_ranges(item, &mut out)?;
            Ok(out)
        }
        ClassSet::BinaryOp(_) => Err(Error::Unsupported(Construct::ClassSetOperation)),
    }
}

fn item_ranges(item: &ClassSetItem, out: &mut Vec<ScalarRange>) -> Result<(), Error> {
    match item {
        ClassSetItem::Empty(_) => Ok(()),
        ClassSetItem::Literal(lit) => {
            out.push((lit.c as u32, lit.c as u32));
            Ok(())
        }
        ClassSetItem::Range(range) => {
            out.push((range.start.c as u32, range.end.c as u32));
            Ok(())
        }
        ClassSetItem::Perl(perl) => {
            let base = perl_base_ranges(&perl.kind);
            if perl.negated {
                out.extend(complement_ranges(base));
            } else {
                out.extend_from_slice(base);
            }
            Ok(())
        }
        ClassSetItem::Union(union) => {
            for item in &union.items {
                item_ranges(item, out)?;
            }
            Ok(())
        }
        ClassSetItem::Ascii(_) => Err(Error::Unsupported(Construct::PosixClass)),
        ClassSetItem::Unicode(_) => Err(Error::Unsupported(Construct::UnicodeProperty)),
        ClassSetItem::Bracketed(_) => Err(Error::Unsupported(Construct::NestedClass)),
    }
}

fn in_ranges(ranges: &[ScalarRange], c: char) -> bool {
    let v = c as u32;
    ranges.iter().any(|&(lo, hi)| lo <= v && v <= hi)
}

fn ranges_match_char(ranges: &[ScalarRange], c: char, flags: Flags) -> bool {
    in_ranges(ranges, c)
        || (flags.ignore_case && c.is_ascii_alphabetic() && in_ranges(ranges, swap_ascii_case(c)))
}

/// How many scalar values an inclusive range covers, excluding the
/// surrogate gap (which no `char` can inhabit).
fn scalar_count(lo: u32, hi: u32) -> u64 {
    let total = (hi - lo + 1) as u64;
    let gap_lo = lo.max(0xD800);
    let gap_hi = hi.min(0xDFFF);
    let gap = if gap_lo <= gap_hi {
        (gap_hi - gap_lo + 1) as u64
    } else {
        0
    };
    total - gap
}

/// Whether the ranges match some character that the alphabet does not
/// represent concretely, i.e. whether the sentinel belongs to the
/// resolution. Under `i` an ASCII uppercase scalar is represented by
/// its lowercase partner, so the A-Z span is excluded from the raw
/// count and handled by the per-letter checks instead.
fn matches_outside_alphabet(ranges: &[ScalarRange], alphabet: &Alphabet, flags: Flags) -> bool {
    for &(lo, hi) in ranges {
        if lo > MAX_SCALAR || hi < lo {
            continue;
        }
        let hi = hi.min(MAX_SCALAR);
        let mut pieces: Vec<ScalarRange> = Vec::with_capacity(2);
        if flags.ignore_case && lo <= 0x5A && hi >= 0x41 {
            if lo < 0x41 {
                pieces.push((lo, 0x40));
            }
            if hi > 0x5A {
                pieces.push((0x5B, hi));
            }
        } else {
            pieces.push((lo, hi));
        }
        for &(lo, hi) in &pieces {
            if scalar_count(lo, hi) > alphabet.concrete_in_range(lo, hi) {
                return true;
            }
        }
    }
    if flags.ignore_case {
        for c in 'A'..='Z' {
            // An uppercase scalar in the ranges whose lowercase form is
            // not a concrete member.
            if in_ranges(ranges, c) && !alphabet.contains_char(c) {
                return true;
            }
        }
        for c in 'a'..='z' {
            // A lowercase character matched only through its uppercase
            // partner, itself unrepresented.
            if in_ranges(ranges, swap_ascii_case(c)) && !alphabet.contains_char(c) {
                return true;
            }
        }
    }
    false
}

fn resolve_ranges(ranges: &[ScalarRange], alphabet: &Alphabet, flags: Flags) -> SymbolSet {
    let mut symbols: Vec<Symbol> = alphabet
        .concrete()
        .filter(|&c| ranges_match_char(ranges, c, flags))
        .map(Symbol::Char)
        .collect();
    if matches_outside_alphabet(ranges, alphabet, flags) {
        symbols.push(Symbol::Other);
    }
    SymbolSet::from_vec(symbols)
}

fn resolve_bracketed(
    cls: &ast::ClassBracketed,
    alphabet: &Alphabet,
    flags: Flags,
) -> Result<SymbolSet, Error> {
    let ranges = class_ranges(&cls.kind)?;
    let positive = resolve_ranges(&ranges, alphabet, flags);
    if cls.negated {
        Ok(alphabet.full_set().subtract(&positive))
    } else {
        Ok(positive)
    }
}

fn resolve_perl(perl: &ast::ClassPerl, alphabet: &Alphabet, flags: Flags) -> SymbolSet {
    let positive = resolve_ranges(perl_base_ranges(&perl.kind), alphabet, flags);
    if perl.negated {
        alphabet.full_set().subtract(&positive)
    } else {
        positive
    }
}

fn resolve_dot(alphabet: &Alphabet, flags: Flags) -> SymbolSet {
    let full = alphabet.full_set();
    if flags.dot_all {
        full
    } else {
        full.subtract(&SymbolSet::singleton(Symbol::Char('\n')))
    }
}

// ---------------------------------------------------------------------------
// State identifiers
// ---------------------------------------------------------------------------

/// A state of the epsilon-NFA and everything derived from it before
/// determinization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StateId(u32);

impl StateId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// A state of the reverse DFA; indexes the subset arena of its [`Dfa`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DfaStateId(u32);

impl DfaStateId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DfaStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.0)
    }
}

/// A (NFA state, DFA state) pair; indexes the pair arena of its
/// [`PrunedNfa`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairId(u32);

impl PairId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// An ordered pair of pruned states; indexes the arena of its
/// [`ProductGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProductId(u32);

impl ProductId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

/// An ordered triple of pruned states; indexes the arena of its
/// [`TripleProductGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TripleId(u32);

impl TripleId {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TripleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Transition map
// ---------------------------------------------------------------------------

/// An ordered transition function: (source, symbol) to a sequence of
/// destinations.
///
/// The destination order is backtracking priority wherever the automaton
/// is a prioritized one, and the sequence may hold the same destination
/// more than once; duplicates record that two distinct routes collapsed
/// onto the same edge, which is exactly what the ambiguity detectors look
/// for. Insertion order of sources and symbols is preserved so that every
/// walk over the map is deterministic.
#[derive(Clone, Debug)]
pub struct TransitionMap<S> {
    map: IndexMap<S, IndexMap<Symbol, Vec<S>>>,
}

impl<S: Copy + Eq + Hash> TransitionMap<S> {
    pub fn new() -> TransitionMap<S> {
        TransitionMap {
            map: IndexMap::new(),
        }
    }

    pub fn add(&mut self, source: S, symbol: Symbol, target: S) {
        self.map
            .entry(source)
            .or_insert_with(IndexMap::new)
            .entry(symbol)
            .or_insert_with(Vec::new)
            .push(target);
    }

    /// The ordered destinations of (source, symbol); empty if none.
    pub fn targets(&self, source: S, symbol: Symbol) -> &[S] {
        self.map
            .get(&source)
            .and_then(|row| row.get(&symbol))
            .map_or(&[], Vec::as_slice)
    }

    /// The (symbol, destinations) row of one source state.
    pub fn row(&self, source: S) -> impl Iterator<Item = (Symbol, &[S])> {
        self.map
            .get(&source)
            .into_iter()
            .flat_map(|row| row.iter().map(|(&symbol, targets)| (symbol, targets.as_slice())))
    }

    /// Every (source, symbol, destinations) entry.
    pub fn entries(&self) -> impl Iterator<Item = (S, Symbol, &[S])> {
        self.map.iter().flat_map(|(&source, row)| {
            row.iter()
                .map(move |(&symbol, targets)| (source, symbol, targets.as_slice()))
        })
    }

    /// Every edge, flattened; parallel edges appear once per occurrence.
    pub fn iter(&self) -> impl Iterator<Item = (S, Symbol, S)> + '_ {
        self.entries()
            .flat_map(|(source, symbol, targets)| {
                targets.iter().map(move |&target| (source, symbol, target))
            })
    }

    pub fn edge_count(&self) -> usize {
        self.map
            .values()
            .flat_map(|row| row.values())
            .map(Vec::len)
            .sum()
    }

    /// The same relation with every edge flipped.
    pub fn reversed(&self) -> TransitionMap<S> {
        let mut out = TransitionMap::new();
        for (source, symbol, target) in self.iter() {
            out.add(target, symbol, source);
        }
        out
    }
}

impl<S: Copy + Eq + Hash> Default for TransitionMap<S> {
    fn default() -> TransitionMap<S> {
        TransitionMap::new()
    }
}

// ---------------------------------------------------------------------------
// Epsilon-NFA (Thompson construction)
// ---------------------------------------------------------------------------

/// One outgoing edge of an epsilon-NFA state: an epsilon edge, or a
/// symbol-set edge. Edge order within a state is backtracking priority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnfaEdge {
    label: Option<SymbolSet>,
    target: StateId,
}

impl EnfaEdge {
    pub fn label(&self) -> Option<&SymbolSet> {
        self.label.as_ref()
    }

    pub fn target(&self) -> StateId {
        self.target
    }

    pub fn is_epsilon(&self) -> bool {
        self.label.is_none()
    }
}

/// The prioritized epsilon-NFA of a pattern: one initial state with no
/// incoming edges, one accepting state with no outgoing edges.
///
/// Matching is modeled as a search, the way a real engine runs an
/// unanchored pattern: every branch not anchored with `^` gets a lazy
/// any-symbol loop in front (retry at the next position, trying the
/// pattern first), and every branch not anchored with `$` gets a greedy
/// any-symbol loop behind (consume the rest of the input after a match).
#[derive(Clone, Debug)]
pub struct EpsilonNfa {
    alphabet: Alphabet,
    initial: StateId,
    accepting: StateId,
    edges: Vec<Vec<EnfaEdge>>,
}

impl EpsilonNfa {
    /// Parses a pattern and builds its epsilon-NFA.
    pub fn parse(pattern: &str, flags: Flags) -> Result<EpsilonNfa, Error> {
        let ast = ast::parse::ParserBuilder::new()
            .build()
            .parse(pattern)
            .map_err(|e| Error::Syntax(Box::new(e)))?;
        EpsilonNfa::build(&ast, flags)
    }

    /// Builds the epsilon-NFA of an already-parsed pattern.
    pub fn build(ast: &Ast, flags: Flags) -> Result<EpsilonNfa, Error> {
        let alphabet = Alphabet::collect(ast, flags);
        let mut builder = EnfaBuilder {
            alphabet: &alphabet,
            flags,
            edges: Vec::new(),
        };
        let fragment = builder.top(ast)?;
        let edges = builder.edges;
        Ok(EpsilonNfa {
            alphabet,
            initial: fragment.start,
            accepting: fragment.end,
            edges,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn accepting(&self) -> StateId {
        self.accepting
    }

    pub fn state_count(&self) -> usize {
        self.edges.len()
    }

    pub fn edges(&self, state: StateId) -> &[EnfaEdge] {
        &self.edges[state.idx()]
    }
}

/// A sub-automaton under construction: one entry state, one exit state.
#[derive(Clone, Copy)]
struct Fragment {
    start: StateId,
    end: StateId,
}

struct EnfaBuilder<'a> {
    alphabet: &'a Alphabet,
    flags: Flags,
    edges: Vec<Vec<EnfaEdge>>,
}

impl EnfaBuilder<'_> {
    fn state(&mut self) -> StateId {
        let id = StateId(self.edges.len() as u32);
        self.edges.push(Vec::new());
        id
    }

    fn epsilon(&mut self, from: StateId, to: StateId) {
        self.edges[from.idx()].push(EnfaEdge {
            label: None,
            target: to,
        });
    }

    fn atom(&mut self, set: SymbolSet) -> Fragment {
        let start = self.state();
        let end = self.state();
        self.edges[start.idx()].push(EnfaEdge {
            label: Some(set),
            target: end,
        });
        Fragment { start, end }
    }

    /// Top level: anchors are interpreted per alternation branch, so that
    /// `foo|^bar` anchors only the second branch.
    fn top(&mut self, ast: &Ast) -> Result<Fragment, Error> {
        match ast {
            Ast::Alternation(alt) => {
                let start = self.state();
                let mut ends = Vec::with_capacity(alt.asts.len());
                for branch in &alt.asts {
                    let fragment = self.branch(branch)?;
                    self.epsilon(start, fragment.start);
                    ends.push(fragment.end);
                }
                let end = self.state();
                for branch_end in ends {
                    self.epsilon(branch_end, end);
                }
                Ok(Fragment { start, end })
            }
            other => self.branch(other),
        }
    }

    /// One top-level branch: strips its leading `^` and trailing `$`, and
    /// wraps the unanchored sides with the search loops.
    fn branch(&mut self, ast: &Ast) -> Result<Fragment, Error> {
        let items: &[Ast] = match ast {
            Ast::Concat(concat) => &concat.asts,
            other => slice::from_ref(other),
        };
        let mut begin = 0;
        let mut end = items.len();
        let mut anchored_start = false;
        let mut anchored_end = false;
        while begin < end && is_start_anchor(&items[begin]) {
            anchored_start = true;
            begin += 1;
        }
        while end > begin && is_end_anchor(&items[end - 1]) {
            anchored_end = true;
            end -= 1;
        }

        let mut parts = Vec::with_capacity(end - begin + 2);
        if !anchored_start {
            // Lazy: try the pattern at this position before skipping a
            // symbol, matching the engine's left-to-right position scan.
            parts.push(self.any_star(false));
        }
        for item in &items[begin..end] {
            let fragment = self.fragment(item)?;
            parts.push(fragment);
        }
        if !anchored_end {
            // Greedy: a real engine stops at the first match; the
            // trailing loop merely absorbs the rest of the input.
            parts.push(self.any_star(true));
        }
        Ok(self.chain(parts))
    }

    fn fragment(&mut self, ast: &Ast) -> Result<Fragment, Error> {
        match ast {
            Ast::Empty(_) => Ok(self.chain(Vec::new())),
            Ast::Literal(lit) => {
                let symbol = Symbol::Char(fold_case(lit.c, self.flags));
                Ok(self.atom(SymbolSet::singleton(symbol)))
            }
            Ast::Dot(_) => {
                let set = resolve_dot(self.alphabet, self.flags);
                Ok(self.atom(set))
            }
            Ast::ClassPerl(perl) => {
                let set = resolve_perl(perl, self.alphabet, self.flags);
                Ok(self.atom(set))
            }
            Ast::ClassBracketed(cls) => {
                let set = resolve_bracketed(cls, self.alphabet, self.flags)?;
                Ok(self.atom(set))
            }
            Ast::ClassUnicode(_) => Err(Error::Unsupported(Construct::UnicodeProperty)),
            Ast::Assertion(assertion) => match assertion.kind {
                AssertionKind::StartLine
                | AssertionKind::EndLine
                | AssertionKind::StartText
                | AssertionKind::EndText => Err(Error::MisplacedAnchor),
                _ => Err(Error::Unsupported(Construct::WordBoundary)),
            },
            Ast::Flags(_) => Err(Error::Unsupported(Construct::InlineFlags)),
            Ast::Group(group) => match &group.kind {
                GroupKind::NonCapturing(flags) if !flags.items.is_empty() => {
                    Err(Error::Unsupported(Construct::InlineFlags))
                }
                _ => self.fragment(&group.ast),
            },
            Ast::Repetition(rep) => {
                let body = self.fragment(&rep.ast)?;
                match rep.op.kind {
                    RepetitionKind::ZeroOrOne => Ok(self.question(body, rep.greedy)),
                    RepetitionKind::ZeroOrMore => Ok(self.star(body, rep.greedy)),
                    RepetitionKind::OneOrMore => Ok(self.plus(body, rep.greedy)),
                    RepetitionKind::Range(_) => {
                        Err(Error::Unsupported(Construct::BoundedRepetition))
                    }
                }
            }
            Ast::Alternation(alt) => {
                let start = self.state();
                let mut ends = Vec::with_capacity(alt.asts.len());
                for branch in &alt.asts {
                    let fragment = self.fragment(branch)?;
                    self.epsilon(start, fragment.start);
                    ends.push(fragment.end);
                }
                let end = self.state();
                for branch_end in ends {
                    self.epsilon(branch_end, end);
                }
                Ok(Fragment { start, end })
            }
            Ast::Concat(concat) => {
                let mut parts = Vec::with_capacity(concat.asts.len());
                for item in &concat.asts {
                    let fragment = self.fragment(item)?;
                    parts.push(fragment);
                }
                Ok(self.chain(parts))
            }
        }
    }

    /// Chains fragments left to right; the empty chain is a single
    /// epsilon edge (matches the empty string).
    fn chain(&mut self, parts: Vec<Fragment>) -> Fragment {
        match parts.split_first() {
            None => {
                let start = self.state();
                let end = self.state();
                self.epsilon(start, end);
                Fragment { start, end }
            }
            Some((first, rest)) => {
                let start = first.start;
                let mut last = first.end;
                for part in rest {
                    self.epsilon(last, part.start);
                    last = part.end;
                }
                Fragment { start, end: last }
            }
        }
    }

    /// `body*`. Greedy enters the loop before exiting, both at the entry
    /// state and when coming back around; lazy is the mirror image.
    fn star(&mut self, body: Fragment, greedy: bool) -> Fragment {
        let start = self.state();
        let end = self.state();
        if greedy {
            self.epsilon(start, body.start);
            self.epsilon(start, end);
            self.epsilon(body.end, body.start);
            self.epsilon(body.end, end);
        } else {
            self.epsilon(start, end);
            self.epsilon(start, body.start);
            self.epsilon(body.end, end);
            self.epsilon(body.end, body.start);
        }
        Fragment { start, end }
    }

    /// `body+`: like `*` but without the edge that skips the body. The
    /// fresh entry state keeps the loop-back edge off the fragment start.
    fn plus(&mut self, body: Fragment, greedy: bool) -> Fragment {
        let start = self.state();
        let end = self.state();
        self.epsilon(start, body.start);
        if greedy {
            self.epsilon(body.end, body.start);
            self.epsilon(body.end, end);
        } else {
            self.epsilon(body.end, end);
            self.epsilon(body.end, body.start);
        }
        Fragment { start, end }
    }

    /// `body?`: like `*` but without the edge that repeats the body.
    fn question(&mut self, body: Fragment, greedy: bool) -> Fragment {
        let start = self.state();
        let end = self.state();
        if greedy {
            self.epsilon(start, body.start);
            self.epsilon(start, end);
        } else {
            self.epsilon(start, end);
            self.epsilon(start, body.start);
        }
        self.epsilon(body.end, end);
        Fragment { start, end }
    }

    /// An any-symbol loop for the unanchored sides of a branch.
    fn any_star(&mut self, greedy: bool) -> Fragment {
        let set = self.alphabet.full_set();
        let body = self.atom(set);
        self.star(body, greedy)
    }
}

fn is_start_anchor(ast: &Ast) -> bool {
    matches!(
        ast,
        Ast::Assertion(a) if matches!(a.kind, AssertionKind::StartLine | AssertionKind::StartText)
    )
}

fn is_end_anchor(ast: &Ast) -> bool {
    matches!(
        ast,
        Ast::Assertion(a) if matches!(a.kind, AssertionKind::EndLine | AssertionKind::EndText)
    )
}

// ---------------------------------------------------------------------------
// Epsilon elimination
// ---------------------------------------------------------------------------

/// The epsilon-free, prioritized NFA: per-(state, symbol) ordered
/// destination lists, one initial state, a set of accepting states.
#[derive(Clone, Debug)]
pub struct OrderedNfa {
    alphabet: Alphabet,
    states: Vec<StateId>,
    initial: StateId,
    accepting: IndexSet<StateId>,
    transitions: TransitionMap<StateId>,
}

impl EpsilonNfa {
    /// Eliminates epsilon edges. For every reachable state, its epsilon
    /// closure is walked depth first and each concrete (symbol, target)
    /// edge found becomes a direct edge, in discovery order; reaching the
    /// accepting state through epsilons marks the source accepting.
    ///
    /// Cycle breaking is per path, not per walk: an epsilon edge is only
    /// skipped when its target is already on the current path. Two
    /// distinct epsilon routes to the same concrete edge therefore yield
    /// that edge twice, and the duplicate is kept. Collapsing it would
    /// erase the ambiguity the later stages exist to find.
    pub fn eliminate(&self) -> OrderedNfa {
        let mut transitions = TransitionMap::new();
        let mut accepting = IndexSet::new();
        let mut discovered = vec![false; self.edges.len()];
        let mut queue = vec![self.initial];
        discovered[self.initial.idx()] = true;
        let mut head = 0;
        while head < queue.len() {
            let state = queue[head];
            head += 1;
            let (items, reaches_accept) = self.closure(state);
            if reaches_accept {
                accepting.insert(state);
            }
            for (symbol, target) in items {
                transitions.add(state, symbol, target);
                if !discovered[target.idx()] {
                    discovered[target.idx()] = true;
                    queue.push(target);
                }
            }
        }
        OrderedNfa {
            alphabet: self.alphabet.clone(),
            states: queue,
            initial: self.initial,
            accepting,
            transitions,
        }
    }

    /// The closure items of one state: each concrete (symbol, target)
    /// edge reachable through epsilons, in depth-first order, plus
    /// whether the accepting state is reachable. A symbol-set edge
    /// contributes one item per symbol in its set.
    fn closure(&self, from: StateId) -> (Vec<(Symbol, StateId)>, bool) {
        let mut items = Vec::new();
        let mut reaches_accept = from == self.accepting;
        let mut on_path = vec![false; self.edges.len()];
        on_path[from.idx()] = true;
        // (state, index of the next edge to look at)
        let mut stack: Vec<(StateId, usize)> = vec![(from, 0)];
        while let Some(&(state, next_edge)) = stack.last() {
            let edges = &self.edges[state.idx()];
            if next_edge == edges.len() {
                on_path[state.idx()] = false;
                stack.pop();
                continue;
            }
            let top = stack.len() - 1;
            stack[top].1 += 1;
            let edge = &edges[next_edge];
            match &edge.label {
                Some(set) => {
                    for &symbol in set.symbols() {
                        items.push((symbol, edge.target));
                    }
                }
                None => {
                    if edge.target == self.accepting {
                        reaches_accept = true;
                    }
                    if !on_path[edge.target.idx()] {
                        on_path[edge.target.idx()] = true;
                        stack.push((edge.target, 0));
                    }
                }
            }
        }
        (items, reaches_accept)
    }
}

impl OrderedNfa {
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    /// The reachable states, in discovery order.
    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn initial(&self) -> StateId {
        self.initial
    }

    pub fn accepting(&self) -> &IndexSet<StateId> {
        &self.accepting
    }

    pub fn transitions(&self) -> &TransitionMap<StateId> {
        &self.transitions
    }

    /// Flips every edge and swaps the initial/accepting roles. The
    /// result is deliberately a different type: destination order means
    /// nothing in the reversed automaton, and the determinizer must not
    /// be handed a prioritized one by accident.
    pub fn reverse(&self) -> ReversedNfa {
        ReversedNfa {
            alphabet: self.alphabet.clone(),
            states: self.states.clone(),
            initial: self.accepting.iter().copied().collect(),
            accepting: self.initial,
            transitions: self.transitions.reversed(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reversed NFA
// ---------------------------------------------------------------------------

/// The reversed NFA: a set of initial states (the forward accepting
/// set), one accepting state (the forward initial state), and no
/// destination order. Input to determinization only.
#[derive(Clone, Debug)]
pub struct ReversedNfa {
    alphabet: Alphabet,
    states: Vec<StateId>,
    initial: Vec<StateId>,
    accepting: StateId,
    transitions: TransitionMap<StateId>,
}

impl ReversedNfa {
    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn states(&self) -> &[StateId] {
        &self.states
    }

    pub fn initial(&self) -> &[StateId] {
        &self.initial
    }

    pub fn accepting(&self) -> StateId {
        self.accepting
    }

    pub fn targets(&self, source: StateId, symbol: Symbol) -> &[StateId] {
        self.transitions.targets(source, symbol)
    }

    pub fn transitions(&self) -> &TransitionMap<StateId> {
        &self.transitions
    }
}

// ---------------------------------------------------------------------------
// Determinization
// ---------------------------------------------------------------------------

/// The subset-construction DFA of a [`ReversedNfa`].
///
/// The transition function is total over the alphabet: the empty subset
/// is an ordinary state that loops to itself on every symbol. It must
/// be, because the pruner derives "doomed contexts" from it; an anchored
/// pattern's exponential blowup happens entirely inside runs the DFA has
/// already written off. Each state remembers the NFA subset it stands
/// for, which the pruner reads back.
#[derive(Clone, Debug)]
pub struct Dfa {
    alphabet: Alphabet,
    initial: DfaStateId,
    accepting: IndexSet<DfaStateId>,
    transitions: IndexMap<DfaStateId, IndexMap<Symbol, DfaStateId>>,
    /// Arena of generating subsets, each sorted; `DfaStateId` indexes it.
    subsets: IndexSet<Box<[StateId]>>,
}

impl Dfa {
    /// Classic worklist subset construction. Subsets are compared by
    /// value (sorted, deduplicated) and interned, so that a subset met
    /// twice maps to the same state.
    pub fn determinize(rev: &ReversedNfa) -> Dfa {
        let mut subsets: IndexSet<Box<[StateId]>> = IndexSet::new();
        let mut seed: Vec<StateId> = rev.initial().to_vec();
        seed.sort();
        seed.dedup();
        let (initial_index, _) = subsets.insert_full(seed.into_boxed_slice());

        let mut transitions: IndexMap<DfaStateId, IndexMap<Symbol, DfaStateId>> = IndexMap::new();
        let mut accepting = IndexSet::new();
        let mut head = 0;
        while head < subsets.len() {
            let id = DfaStateId(head as u32);
            let current: Vec<StateId> = subsets[head].to_vec();
            head += 1;
            if current.binary_search(&rev.accepting()).is_ok() {
                accepting.insert(id);
            }
            let mut row = IndexMap::new();
            for &symbol in rev.alphabet().symbols() {
                let mut next: Vec<StateId> = Vec::new();
                for &state in &current {
                    next.extend_from_slice(rev.targets(state, symbol));
                }
                next.sort();
                next.dedup();
                let (target_index, _) = subsets.insert_full(next.into_boxed_slice());
                row.insert(symbol, DfaStateId(target_index as u32));
            }
            transitions.insert(id, row);
        }

        Dfa {
            alphabet: rev.alphabet().clone(),
            initial: DfaStateId(initial_index as u32),
            accepting,
            transitions,
            subsets,
        }
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn initial(&self) -> DfaStateId {
        self.initial
    }

    pub fn accepting(&self) -> &IndexSet<DfaStateId> {
        &self.accepting
    }

    pub fn state_count(&self) -> usize {
        self.subsets.len()
    }

    pub fn state_ids(&self) -> impl Iterator<Item = DfaStateId> {
        (0..self.subsets.len() as u32).map(DfaStateId)
    }

    /// The sorted NFA subset a DFA state stands for.
    pub fn subset(&self, id: DfaStateId) -> &[StateId] {
        &self.subsets[id.idx()]
    }

    pub fn target(&self, source: DfaStateId, symbol: Symbol) -> Option<DfaStateId> {
        self.transitions.get(&source).and_then(|row| row.get(&symbol)).copied()
    }

    /// Every (source, symbol, target) edge.
    pub fn edges(&self) -> impl Iterator<Item = (DfaStateId, Symbol, DfaStateId)> + '_ {
        self.transitions.iter().flat_map(|(&source, row)| {
            row.iter().map(move |(&symbol, &target)| (source, symbol, target))
        })
    }
}

// ---------------------------------------------------------------------------
// Pruning
// ---------------------------------------------------------------------------

/// The pruned NFA: states are (forward NFA state, reverse DFA state)
/// pairs, with an initial *set* and an accepting *set*.
///
/// A pair (q, Q) reads "the engine is at q, and the remaining input is
/// one that exactly the states in Q can accept." Priority order is
/// carried over from the forward NFA, but alternatives that a
/// backtracking engine can never settle on in a given context are
/// dropped: once a destination is a member of the context's subset, the
/// run through it will succeed, so everything after it in the priority
/// list is unreachable.
#[derive(Clone, Debug)]
pub struct PrunedNfa {
    /// The symbols surviving on pruned edges, sorted.
    alphabet: Box<[Symbol]>,
    /// The pattern's full alphabet; attack synthesis needs symbols the
    /// pruned graph no longer uses.
    full_alphabet: Alphabet,
    states: Vec<PairId>,
    initial: Vec<PairId>,
    accepting: IndexSet<PairId>,
    transitions: TransitionMap<PairId>,
    /// Arena of pairs; `PairId` indexes it.
    pairs: IndexSet<(StateId, DfaStateId)>,
}

impl PrunedNfa {
    pub fn build(nfa: &OrderedNfa, dfa: &Dfa) -> PrunedNfa {
        let mut pairs: IndexSet<(StateId, DfaStateId)> = IndexSet::new();
        let intern = |pairs: &mut IndexSet<(StateId, DfaStateId)>, q: StateId, d: DfaStateId| {
            PairId(pairs.insert_full((q, d)).0 as u32)
        };

        // The engine can start at the forward initial state under any
        // reverse context.
        let initial: Vec<PairId> = dfa
            .state_ids()
            .map(|d| intern(&mut pairs, nfa.initial(), d))
            .collect();

        // A run accepts at (q, Q0) where Q0 is the DFA's own initial
        // state (no input left) and q can accept with no input left,
        // i.e. q is in Q0's subset.
        let accepting_candidates: Vec<PairId> = dfa
            .subset(dfa.initial())
            .iter()
            .map(|&q| intern(&mut pairs, q, dfa.initial()))
            .collect();

        let mut transitions = TransitionMap::new();
        for (q1, symbol, dests) in nfa.transitions().entries() {
            for context in dfa.state_ids() {
                // DFA edge context --symbol--> entered, read backwards:
                // consuming `symbol` in forward direction moves the rest-
                // of-input context from `entered` to `context`.
                let Some(entered) = dfa.target(context, symbol) else {
                    continue;
                };
                let from = intern(&mut pairs, q1, entered);
                let subset = dfa.subset(context);
                for &dest in dests {
                    let to = intern(&mut pairs, dest, context);
                    transitions.add(from, symbol, to);
                    if subset.binary_search(&dest).is_ok() {
                        // This alternative succeeds in this context;
                        // lower-priority ones after it are unreachable.
                        break;
                    }
                }
            }
        }

        // Keep only pairs reachable from the initial set.
        let mut visited = vec![false; pairs.len()];
        let mut queue: Vec<PairId> = Vec::new();
        for &p in &initial {
            if !visited[p.idx()] {
                visited[p.idx()] = true;
                queue.push(p);
            }
        }
        let mut head = 0;
        while head < queue.len() {
            let p = queue[head];
            head += 1;
            for (_, targets) in transitions.row(p) {
                for &t in targets {
                    if !visited[t.idx()] {
                        visited[t.idx()] = true;
                        queue.push(t);
                    }
                }
            }
        }

        let mut kept = TransitionMap::new();
        let mut used_symbols: BTreeSet<Symbol> = BTreeSet::new();
        for &p in &queue {
            for (symbol, targets) in transitions.row(p) {
                for &t in targets {
                    kept.add(p, symbol, t);
                    used_symbols.insert(symbol);
                }
            }
        }
        let accepting = accepting_candidates
            .into_iter()
            .filter(|p| visited[p.idx()])
            .collect();

        PrunedNfa {
            alphabet: used_symbols.into_iter().collect(),
            full_alphabet: nfa.alphabet().clone(),
            states: queue,
            initial,
            accepting,
            transitions: kept,
            pairs,
        }
    }

    /// The symbols still used by surviving edges.
    pub fn alphabet(&self) -> &[Symbol] {
        &self.alphabet
    }

    pub fn full_alphabet(&self) -> &Alphabet {
        &self.full_alphabet
    }

    /// The surviving states, in BFS discovery order.
    pub fn states(&self) -> &[PairId] {
        &self.states
    }

    pub fn initial(&self) -> &[PairId] {
        &self.initial
    }

    pub fn accepting(&self) -> &IndexSet<PairId> {
        &self.accepting
    }

    pub fn transitions(&self) -> &TransitionMap<PairId> {
        &self.transitions
    }

    /// The (NFA state, DFA state) pair behind an id.
    pub fn components(&self, id: PairId) -> (StateId, DfaStateId) {
        self.pairs[id.idx()]
    }

    /// Human-readable form of a pair, for diagnostics and DOT output.
    pub fn label(&self, id: PairId) -> String {
        let (q, d) = self.components(id);
        format!("({q}, {d})")
    }
}

// ---------------------------------------------------------------------------
// Strongly connected components
// ---------------------------------------------------------------------------

/// Anything the SCC decomposer can run on: a state list, an alphabet,
/// and an ordered transition function.
pub trait TransitionGraph {
    type State: Copy + Eq + Hash;

    fn state_list(&self) -> &[Self::State];
    fn alphabet(&self) -> &[Symbol];
    fn transitions(&self) -> &TransitionMap<Self::State>;
}

/// One strongly connected component, as an induced subgraph: its states
/// plus exactly the edges whose endpoints both lie inside it. Self-loops
/// and parallel edges are preserved with their multiplicity.
#[derive(Clone, Debug)]
pub struct SccGraph<S> {
    states: Vec<S>,
    alphabet: Box<[Symbol]>,
    transitions: TransitionMap<S>,
}

impl<S: Copy + Eq + Hash> SccGraph<S> {
    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub fn contains(&self, state: S) -> bool {
        self.states.contains(&state)
    }
}

impl<S: Copy + Eq + Hash> TransitionGraph for SccGraph<S> {
    type State = S;

    fn state_list(&self) -> &[S] {
        &self.states
    }

    fn alphabet(&self) -> &[Symbol] {
        &self.alphabet
    }

    fn transitions(&self) -> &TransitionMap<S> {
        &self.transitions
    }
}

impl TransitionGraph for PrunedNfa {
    type State = PairId;

    fn state_list(&self) -> &[PairId] {
        &self.states
    }

    fn alphabet(&self) -> &[Symbol] {
        &self.alphabet
    }

    fn transitions(&self) -> &TransitionMap<PairId> {
        &self.transitions
    }
}

/// Kosaraju's two-pass algorithm, iteratively: a forward DFS recording
/// finish order, then a reverse DFS in decreasing finish order assigning
/// components. Components come out in reverse topological order of the
/// condensation; states inside one keep the graph's state-list order.
pub fn strongly_connected_components<G: TransitionGraph>(graph: &G) -> Vec<SccGraph<G::State>> {
    let states = graph.state_list();
    let n = states.len();
    let mut position: HashMap<G::State, usize> = HashMap::with_capacity(n);
    for (i, &s) in states.iter().enumerate() {
        position.insert(s, i);
    }

    // Adjacency by state-list position; edges with an endpoint outside
    // the state list are ignored.
    let mut forward: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut backward: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (source, _, target) in graph.transitions().iter() {
        if let (Some(&a), Some(&b)) = (position.get(&source), position.get(&target)) {
            forward[a].push(b);
            backward[b].push(a);
        }
    }

    // Pass 1: forward DFS, post-order finish times.
    let mut finish: Vec<usize> = Vec::with_capacity(n);
    let mut visited = vec![false; n];
    for root in 0..n {
        if visited[root] {
            continue;
        }
        let mut stack: Vec<(usize, bool)> = vec![(root, false)];
        while let Some((v, expanded)) = stack.pop() {
            if expanded {
                finish.push(v);
                continue;
            }
            if visited[v] {
                continue;
            }
            visited[v] = true;
            stack.push((v, true));
            for &w in &forward[v] {
                if !visited[w] {
                    stack.push((w, false));
                }
            }
        }
    }

    // Pass 2: reverse DFS from the latest-finishing unassigned state.
    let mut component = vec![usize::MAX; n];
    let mut count = 0;
    for &root in finish.iter().rev() {
        if component[root] != usize::MAX {
            continue;
        }
        component[root] = count;
        let mut stack = vec![root];
        while let Some(v) = stack.pop() {
            for &w in &backward[v] {
                if component[w] == usize::MAX {
                    component[w] = count;
                    stack.push(w);
                }
            }
        }
        count += 1;
    }

    let mut out: Vec<SccGraph<G::State>> = (0..count)
        .map(|_| SccGraph {
            states: Vec::new(),
            alphabet: graph.alphabet().to_vec().into_boxed_slice(),
            transitions: TransitionMap::new(),
        })
        .collect();
    for (i, &s) in states.iter().enumerate() {
        out[component[i]].states.push(s);
    }
    for (source, symbol, target) in graph.transitions().iter() {
        if let (Some(&a), Some(&b)) = (position.get(&source), position.get(&target)) {
            if component[a] == component[b] {
                out[component[a]].transitions.add(source, symbol, target);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Product graphs
// ---------------------------------------------------------------------------

/// The pairwise synchronized product of one SCC with itself: an edge
/// (l, r) --x--> (l', r') for every two edges l--x-->l' and r--x-->r' of
/// the component. Parallel input edges multiply out into parallel
/// product edges; the EDA check counts them. Pairs are interned lazily,
/// so only pairs touched by an edge exist.
#[derive(Clone, Debug)]
pub struct ProductGraph {
    alphabet: Box<[Symbol]>,
    states: Vec<ProductId>,
    transitions: TransitionMap<ProductId>,
    pairs: IndexSet<(PairId, PairId)>,
}

impl ProductGraph {
    pub fn build(scc: &SccGraph<PairId>) -> ProductGraph {
        let mut by_symbol: IndexMap<Symbol, Vec<(PairId, PairId)>> = IndexMap::new();
        for (source, symbol, target) in scc.transitions().iter() {
            by_symbol
                .entry(symbol)
                .or_insert_with(Vec::new)
                .push((source, target));
        }

        let mut pairs: IndexSet<(PairId, PairId)> = IndexSet::new();
        let mut transitions = TransitionMap::new();
        for (&symbol, edges) in by_symbol.iter() {
            for &(ls, lt) in edges {
                for &(rs, rt) in edges {
                    let from = ProductId(pairs.insert_full((ls, rs)).0 as u32);
                    let to = ProductId(pairs.insert_full((lt, rt)).0 as u32);
                    transitions.add(from, symbol, to);
                }
            }
        }

        let states = (0..pairs.len() as u32).map(ProductId).collect();
        ProductGraph {
            alphabet: scc.alphabet().to_vec().into_boxed_slice(),
            states,
            transitions,
            pairs,
        }
    }

    /// The (left, right) pair behind an id.
    pub fn components(&self, id: ProductId) -> (PairId, PairId) {
        self.pairs[id.idx()]
    }
}

impl TransitionGraph for ProductGraph {
    type State = ProductId;

    fn state_list(&self) -> &[ProductId] {
        &self.states
    }

    fn alphabet(&self) -> &[Symbol] {
        &self.alphabet
    }

    fn transitions(&self) -> &TransitionMap<ProductId> {
        &self.transitions
    }
}

/// The triple product of two distinct SCCs, over the union of their
/// states: an edge (l, c, r) --x--> (l', c', r') whenever each
/// coordinate follows an edge on x in the unioned relation (both
/// components' internal edges plus the pruned-NFA edges crossing between
/// them).
///
/// For every crossing edge s --x--> d it additionally inserts the
/// fold-back edge (s, d, d) --x--> (s, s, d), recording "the pump
/// position shifted by one offset". Those synthetic edges are kept
/// separately as the extras set; IDA holds exactly when one of them
/// closes a cycle.
#[derive(Clone, Debug)]
pub struct TripleProductGraph {
    alphabet: Box<[Symbol]>,
    states: Vec<TripleId>,
    transitions: TransitionMap<TripleId>,
    extras: Vec<(TripleId, Symbol, TripleId)>,
    triples: IndexSet<(PairId, PairId, PairId)>,
}

impl TripleProductGraph {
    /// Returns `None` when no pruned edge crosses between the two
    /// components in either direction: without a crossing there is no
    /// fold-back edge, hence nothing to detect.
    pub fn build(
        left: &SccGraph<PairId>,
        right: &SccGraph<PairId>,
        pruned: &PrunedNfa,
    ) -> Option<TripleProductGraph> {
        let in_left: HashSet<PairId> = left.states().iter().copied().collect();
        let in_right: HashSet<PairId> = right.states().iter().copied().collect();

        let mut between: Vec<(PairId, Symbol, PairId)> = Vec::new();
        for (source, symbol, target) in pruned.transitions().iter() {
            let crosses = (in_left.contains(&source) && in_right.contains(&target))
                || (in_right.contains(&source) && in_left.contains(&target));
            if crosses {
                between.push((source, symbol, target));
            }
        }
        if between.is_empty() {
            return None;
        }

        let mut by_symbol: IndexMap<Symbol, Vec<(PairId, PairId)>> = IndexMap::new();
        let unioned = left
            .transitions()
            .iter()
            .chain(right.transitions().iter())
            .chain(between.iter().copied());
        for (source, symbol, target) in unioned {
            by_symbol
                .entry(symbol)
                .or_insert_with(Vec::new)
                .push((source, target));
        }

        let mut triples: IndexSet<(PairId, PairId, PairId)> = IndexSet::new();
        let mut transitions = TransitionMap::new();
        for (&symbol, edges) in by_symbol.iter() {
            for &(ls, lt) in edges {
                for &(cs, ct) in edges {
                    for &(rs, rt) in edges {
                        let from = TripleId(triples.insert_full((ls, cs, rs)).0 as u32);
                        let to = TripleId(triples.insert_full((lt, ct, rt)).0 as u32);
                        transitions.add(from, symbol, to);
                    }
                }
            }
        }

        let mut extras = Vec::with_capacity(between.len());
        for &(s, symbol, d) in &between {
            let from = TripleId(triples.insert_full((s, d, d)).0 as u32);
            let to = TripleId(triples.insert_full((s, s, d)).0 as u32);
            transitions.add(from, symbol, to);
            extras.push((from, symbol, to));
        }

        let states = (0..triples.len() as u32).map(TripleId).collect();
        Some(TripleProductGraph {
            alphabet: pruned.alphabet().to_vec().into_boxed_slice(),
            states,
            transitions,
            extras,
            triples,
        })
    }

    /// The (left, center, right) triple behind an id.
    pub fn components(&self, id: TripleId) -> (PairId, PairId, PairId) {
        self.triples[id.idx()]
    }

    /// The fold-back edges.
    pub fn extras(&self) -> &[(TripleId, Symbol, TripleId)] {
        &self.extras
    }
}

impl TransitionGraph for TripleProductGraph {
    type State = TripleId;

    fn state_list(&self) -> &[TripleId] {
        &self.states
    }

    fn alphabet(&self) -> &[Symbol] {
        &self.alphabet
    }

    fn transitions(&self) -> &TransitionMap<TripleId> {
        &self.transitions
    }
}

// ---------------------------------------------------------------------------
// Ambiguity detection
// ---------------------------------------------------------------------------

/// How bad the backtracking blowup is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ambiguity {
    /// EDA: matching time exponential in the input length.
    Exponential,
    /// IDA: matching time polynomial (superlinear) in the input length.
    Polynomial,
}

impl fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ambiguity::Exponential => f.write_str("exponential"),
            Ambiguity::Polynomial => f.write_str("polynomial"),
        }
    }
}

/// An EDA witness: a pruned state on an ambiguous cycle, and the symbol
/// word that walks the cycle back to it in two distinguishable ways.
#[derive(Clone, Debug)]
pub struct EdaWitness {
    pub state: PairId,
    pub pump: Vec<Symbol>,
}

/// An IDA witness: the pump runs from `from` to `to` along a shortest
/// pruned path; each extra copy of the pump adds another coexisting
/// match position.
#[derive(Clone, Debug)]
pub struct IdaWitness {
    pub from: PairId,
    pub to: PairId,
}

/// Multi-source BFS over an ordered transition map. Returns the first
/// state satisfying `goal` together with the symbol word leading to it
/// (empty if a source already satisfies it).
fn shortest_path<S, F>(
    transitions: &TransitionMap<S>,
    sources: &[S],
    goal: F,
) -> Option<(S, Vec<Symbol>)>
where
    S: Copy + Eq + Hash,
    F: Fn(S) -> bool,
{
    for &s in sources {
        if goal(s) {
            return Some((s, Vec::new()));
        }
    }
    let mut parent: IndexMap<S, Option<(S, Symbol)>> = IndexMap::new();
    let mut queue: Vec<S> = Vec::new();
    for &s in sources {
        if !parent.contains_key(&s) {
            parent.insert(s, None);
            queue.push(s);
        }
    }
    let mut head = 0;
    while head < queue.len() {
        let v = queue[head];
        head += 1;
        for (symbol, targets) in transitions.row(v) {
            for &t in targets {
                if parent.contains_key(&t) {
                    continue;
                }
                parent.insert(t, Some((v, symbol)));
                if goal(t) {
                    let mut word = Vec::new();
                    let mut cursor = t;
                    while let Some(&Some((prev, sym))) = parent.get(&cursor) {
                        word.push(sym);
                        cursor = prev;
                    }
                    word.reverse();
                    return Some((t, word));
                }
                queue.push(t);
            }
        }
    }
    None
}

/// Scans the diagonal of every product SCC for the two EDA shapes:
/// (a) one symbol with two parallel self-loops at a diagonal state, or
/// (b) a diagonal state sharing its component with an off-diagonal one.
/// Either certifies two distinguishable walks that consume the same
/// word and resynchronize, the seed of exponential backtracking.
pub fn find_eda(sccs: &[SccGraph<PairId>]) -> Result<Option<EdaWitness>, Error> {
    for scc in sccs {
        let product = ProductGraph::build(scc);
        for comp in strongly_connected_components(&product) {
            // (a) parallel self-loops.
            for &p in comp.states() {
                let (l, r) = product.components(p);
                if l != r {
                    continue;
                }
                for (symbol, targets) in comp.transitions().row(p) {
                    if targets.iter().filter(|&&t| t == p).count() >= 2 {
                        return Ok(Some(EdaWitness {
                            state: l,
                            pump: vec![symbol],
                        }));
                    }
                }
            }
            // (b) diagonal and off-diagonal state in one component. The
            // pump is the round trip diagonal -> off-diagonal -> back.
            let diagonal = comp
                .states()
                .iter()
                .copied()
                .find(|&p| {
                    let (l, r) = product.components(p);
                    l == r
                });
            let off_diagonal = comp
                .states()
                .iter()
                .copied()
                .find(|&p| {
                    let (l, r) = product.components(p);
                    l != r
                });
            if let (Some(diag), Some(off)) = (diagonal, off_diagonal) {
                let Some((_, out_word)) = shortest_path(comp.transitions(), &[diag], |s| s == off)
                else {
                    return Err(Error::Invariant("product component is not strongly connected"));
                };
                let Some((_, back_word)) = shortest_path(comp.transitions(), &[off], |s| s == diag)
                else {
                    return Err(Error::Invariant("product component is not strongly connected"));
                };
                let mut pump = out_word;
                pump.extend(back_word);
                let (state, _) = product.components(diag);
                return Ok(Some(EdaWitness { state, pump }));
            }
        }
    }
    Ok(None)
}

/// Looks for a fold-back edge of some triple product whose endpoints
/// share a strongly connected component: the pump position can then
/// shift forever, one offset per pump copy, which is the IDA shape.
/// Components are tried pairwise; EDA-free inputs are assumed (run
/// [`find_eda`] first).
pub fn find_ida(pruned: &PrunedNfa, sccs: &[SccGraph<PairId>]) -> Result<Option<IdaWitness>, Error> {
    for i in 0..sccs.len() {
        for j in (i + 1)..sccs.len() {
            let Some(triple) = TripleProductGraph::build(&sccs[i], &sccs[j], pruned) else {
                continue;
            };
            let comps = strongly_connected_components(&triple);
            let mut comp_of: HashMap<TripleId, usize> = HashMap::new();
            for (index, comp) in comps.iter().enumerate() {
                for &s in comp.states() {
                    comp_of.insert(s, index);
                }
            }
            for &(from, _, to) in triple.extras() {
                let (Some(&a), Some(&b)) = (comp_of.get(&from), comp_of.get(&to)) else {
                    return Err(Error::Invariant("triple product state missing a component"));
                };
                if a == b {
                    let (s, d, _) = triple.components(from);
                    return Ok(Some(IdaWitness { from: s, to: d }));
                }
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Attack synthesis
// ---------------------------------------------------------------------------

/// How many times an attack string repeats its pump.
pub const PUMP_REPEAT: usize = 20;

/// Turns a witness into a concrete attack string:
/// prefix + pump repeated [`PUMP_REPEAT`] times + suffix.
///
/// The prefix drives the engine from the initial set to the witness; the
/// pump is the ambiguous cycle; the suffix drives the whole live state
/// set into a position from which acceptance is impossible, so that the
/// engine exhausts every doomed alternative before giving up. Any of the
/// three searches can come up empty (most commonly the suffix, when the
/// pattern matches every completion); the attack is then `None` while
/// the finding itself stands.
pub struct Attacker<'a> {
    pruned: &'a PrunedNfa,
}

impl<'a> Attacker<'a> {
    pub fn new(pruned: &'a PrunedNfa) -> Attacker<'a> {
        Attacker { pruned }
    }

    pub fn eda_attack(&self, witness: &EdaWitness) -> Option<String> {
        let (_, prefix) = shortest_path(self.pruned.transitions(), self.pruned.initial(), |s| {
            s == witness.state
        })?;
        self.assemble(prefix, &witness.pump)
    }

    pub fn ida_attack(&self, witness: &IdaWitness) -> Option<String> {
        let (_, prefix) = shortest_path(self.pruned.transitions(), self.pruned.initial(), |s| {
            s == witness.from
        })?;
        let (_, pump) = shortest_path(self.pruned.transitions(), &[witness.from], |s| {
            s == witness.to
        })?;
        self.assemble(prefix, &pump)
    }

    fn assemble(&self, prefix: Vec<Symbol>, pump: &[Symbol]) -> Option<String> {
        let mut symbols = prefix;
        for _ in 0..PUMP_REPEAT {
            symbols.extend_from_slice(pump);
        }
        let suffix = self.failing_suffix(&symbols)?;
        symbols.extend(suffix);
        Some(self.render(&symbols))
    }

    /// A word that, appended after `consumed`, leaves no live state able
    /// to accept. The search starts from the set of *all* states live
    /// after `consumed` (not just the witness: other branches of the
    /// pattern may still be happy to accept) and walks subsets over the
    /// full alphabet; pruning may have narrowed the edge alphabet, but
    /// the killing symbol is often one the pruned graph no longer uses.
    fn failing_suffix(&self, consumed: &[Symbol]) -> Option<Vec<Symbol>> {
        let mut current: Vec<PairId> = self.pruned.initial().to_vec();
        current.sort();
        current.dedup();
        for &symbol in consumed {
            current = self.step(&current, symbol);
        }
        if self.dead(&current) {
            return Some(Vec::new());
        }

        let full: Vec<Symbol> = self.pruned.full_alphabet().symbols().to_vec();
        let mut subsets: IndexSet<Box<[PairId]>> = IndexSet::new();
        let mut parent: Vec<Option<(usize, Symbol)>> = Vec::new();
        subsets.insert(current.into_boxed_slice());
        parent.push(None);
        let mut head = 0;
        while head < subsets.len() {
            let here: Vec<PairId> = subsets[head].to_vec();
            for &symbol in &full {
                let next = self.step(&here, symbol);
                let (index, inserted) = subsets.insert_full(next.clone().into_boxed_slice());
                if !inserted {
                    continue;
                }
                parent.push(Some((head, symbol)));
                if self.dead(&next) {
                    let mut word = Vec::new();
                    let mut cursor = index;
                    while let Some((prev, sym)) = parent[cursor] {
                        word.push(sym);
                        cursor = prev;
                    }
                    word.reverse();
                    return Some(word);
                }
            }
            head += 1;
        }
        None
    }

    fn step(&self, states: &[PairId], symbol: Symbol) -> Vec<PairId> {
        let mut next = Vec::new();
        for &state in states {
            next.extend_from_slice(self.pruned.transitions().targets(state, symbol));
        }
        next.sort();
        next.dedup();
        next
    }

    fn dead(&self, states: &[PairId]) -> bool {
        !states.iter().any(|s| self.pruned.accepting().contains(s))
    }

    fn render(&self, symbols: &[Symbol]) -> String {
        let other = self.other_char();
        symbols
            .iter()
            .map(|s| match s {
                Symbol::Char(c) => *c,
                Symbol::Other => other,
            })
            .collect()
    }

    /// A concrete character for the sentinel: the first printable ASCII
    /// character outside the alphabet, falling back to an exhaustive
    /// scan (the alphabet is finite, so one always exists).
    fn other_char(&self) -> char {
        let printable = 0x21..=0x7E;
        let rest = (0..=0x20).chain(0x7F..=0x10FFFF);
        printable
            .chain(rest)
            .filter_map(char::from_u32)
            .find(|&c| !self.pruned.full_alphabet().contains_char(c))
            .unwrap_or('\u{FFFD}')
    }
}

// ---------------------------------------------------------------------------
// Analysis entry point
// ---------------------------------------------------------------------------

/// One diagnosed vulnerability.
#[derive(Clone, Debug)]
pub struct Finding {
    pub ambiguity: Ambiguity,
    /// Human-readable summary naming the pump word.
    pub message: String,
    /// `None` when a witness exists but no finite input can force full
    /// backtracking (e.g. the pattern accepts every completion).
    pub attack: Option<String>,
}

/// The verdict for one pattern.
#[derive(Clone, Debug)]
pub enum Analysis {
    Safe,
    Vulnerable(Finding),
}

impl Analysis {
    pub fn is_safe(&self) -> bool {
        matches!(self, Analysis::Safe)
    }
}

/// Analyzes a pattern for catastrophic backtracking.
///
/// Runs the full pipeline and scans for exponential ambiguity first;
/// a pattern that is both exponentially and polynomially ambiguous
/// reports the exponential finding.
pub fn analyze(pattern: &str, flags: Flags) -> Result<Analysis, Error> {
    let enfa = EpsilonNfa::parse(pattern, flags)?;
    let nfa = enfa.eliminate();
    let reversed = nfa.reverse();
    let dfa = Dfa::determinize(&reversed);
    let pruned = PrunedNfa::build(&nfa, &dfa);
    let sccs = strongly_connected_components(&pruned);

    if let Some(witness) = find_eda(&sccs)? {
        let attack = Attacker::new(&pruned).eda_attack(&witness);
        let message = format!(
            "exponential backtracking on repetitions of {}",
            describe_word(&witness.pump)
        );
        return Ok(Analysis::Vulnerable(Finding {
            ambiguity: Ambiguity::Exponential,
            message,
            attack,
        }));
    }
    if let Some(witness) = find_ida(&pruned, &sccs)? {
        let attack = Attacker::new(&pruned).ida_attack(&witness);
        let message = match shortest_path(pruned.transitions(), &[witness.from], |s| {
            s == witness.to
        }) {
            Some((_, pump)) => format!(
                "polynomial backtracking on repetitions of {}",
                describe_word(&pump)
            ),
            None => String::from("polynomial backtracking ambiguity"),
        };
        return Ok(Analysis::Vulnerable(Finding {
            ambiguity: Ambiguity::Polynomial,
            message,
            attack,
        }));
    }
    Ok(Analysis::Safe)
}

fn describe_word(word: &[Symbol]) -> String {
    let mut out = String::from("\"");
    for symbol in word {
        out.push_str(&symbol.to_string());
    }
    out.push('"');
    out
}

// ---------------------------------------------------------------------------
// DOT output
// ---------------------------------------------------------------------------

/// Options for [`EpsilonNfa::to_dot`] and friends.
#[derive(Clone, Copy, Debug, Default)]
pub struct DotOptions {
    /// Lay the graph out left to right instead of top to bottom.
    pub horizontal: bool,
}

fn dot_header(options: DotOptions) -> String {
    let mut out = String::from("digraph {\n");
    if options.horizontal {
        out.push_str("\trankdir = LR;\n");
    }
    out
}

fn dot_escape(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn set_label(set: &SymbolSet) -> String {
    match set.symbols() {
        [single] => single.to_string(),
        symbols => {
            let mut out = String::from("[");
            for symbol in symbols {
                out.push_str(&symbol.to_string());
            }
            out.push(']');
            out
        }
    }
}

impl EpsilonNfa {
    /// Renders the automaton as Graphviz DOT. Accepting states are
    /// double circles; the initial state is marked by a point-shaped
    /// satellite; the taillabel on each edge is its 1-based priority
    /// among the source state's edges.
    pub fn to_dot(&self, options: DotOptions) -> String {
        let mut out = dot_header(options);
        for index in 0..self.edges.len() {
            let id = StateId(index as u32);
            let shape = if id == self.accepting { "doublecircle" } else { "circle" };
            out.push_str(&format!("\t{id} [shape = {shape}];\n"));
        }
        out.push_str(&format!("\t{0}_init [shape = point];\n", self.initial));
        out.push_str(&format!("\t{0}_init -> {0};\n", self.initial));
        for (index, edges) in self.edges.iter().enumerate() {
            let from = StateId(index as u32);
            for (priority, edge) in edges.iter().enumerate() {
                let label = match &edge.label {
                    None => String::from("ε"),
                    Some(set) => set_label(set),
                };
                out.push_str(&format!(
                    "\t{} -> {} [taillabel = \"{}\", label = \"{}\"];\n",
                    from,
                    edge.target,
                    priority + 1,
                    dot_escape(&label)
                ));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl OrderedNfa {
    /// Like [`EpsilonNfa::to_dot`]; the taillabel is the 1-based
    /// priority within the (state, symbol) destination list.
    pub fn to_dot(&self, options: DotOptions) -> String {
        let mut out = dot_header(options);
        for &state in &self.states {
            let shape = if self.accepting.contains(&state) { "doublecircle" } else { "circle" };
            out.push_str(&format!("\t{state} [shape = {shape}];\n"));
        }
        out.push_str(&format!("\t{0}_init [shape = point];\n", self.initial));
        out.push_str(&format!("\t{0}_init -> {0};\n", self.initial));
        for &state in &self.states {
            for (symbol, targets) in self.transitions.row(state) {
                for (priority, &target) in targets.iter().enumerate() {
                    out.push_str(&format!(
                        "\t{} -> {} [taillabel = \"{}\", label = \"{}\"];\n",
                        state,
                        target,
                        priority + 1,
                        dot_escape(&symbol.to_string())
                    ));
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl ReversedNfa {
    /// No taillabels: the reversed automaton has no priority order.
    pub fn to_dot(&self, options: DotOptions) -> String {
        let mut out = dot_header(options);
        for &state in &self.states {
            let shape = if state == self.accepting { "doublecircle" } else { "circle" };
            out.push_str(&format!("\t{state} [shape = {shape}];\n"));
        }
        for &state in &self.initial {
            out.push_str(&format!("\t{state}_init [shape = point];\n"));
            out.push_str(&format!("\t{state}_init -> {state};\n"));
        }
        for &state in &self.states {
            for (symbol, targets) in self.transitions.row(state) {
                for &target in targets {
                    out.push_str(&format!(
                        "\t{} -> {} [label = \"{}\"];\n",
                        state,
                        target,
                        dot_escape(&symbol.to_string())
                    ));
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

impl Dfa {
    /// Each node is labeled with the NFA subset it stands for.
    pub fn to_dot(&self, options: DotOptions) -> String {
        let mut out = dot_header(options);
        for id in self.state_ids() {
            let shape = if self.accepting.contains(&id) { "doublecircle" } else { "circle" };
            let mut subset = String::from("{");
            for (i, q) in self.subset(id).iter().enumerate() {
                if i > 0 {
                    subset.push_str(", ");
                }
                subset.push_str(&q.to_string());
            }
            subset.push('}');
            out.push_str(&format!(
                "\t{id} [shape = {shape}, label = \"{}\"];\n",
                dot_escape(&subset)
            ));
        }
        out.push_str(&format!("\t{0}_init [shape = point];\n", self.initial));
        out.push_str(&format!("\t{0}_init -> {0};\n", self.initial));
        for (source, symbol, target) in self.edges() {
            out.push_str(&format!(
                "\t{} -> {} [label = \"{}\"];\n",
                source,
                target,
                dot_escape(&symbol.to_string())
            ));
        }
        out.push_str("}\n");
        out
    }
}

impl PrunedNfa {
    /// Each node is labeled with its (NFA state, DFA state) pair.
    pub fn to_dot(&self, options: DotOptions) -> String {
        let mut out = dot_header(options);
        for &state in &self.states {
            let shape = if self.accepting.contains(&state) { "doublecircle" } else { "circle" };
            out.push_str(&format!(
                "\t{state} [shape = {shape}, label = \"{}\"];\n",
                dot_escape(&self.label(state))
            ));
        }
        for &state in &self.initial {
            out.push_str(&format!("\t{state}_init [shape = point];\n"));
            out.push_str(&format!("\t{state}_init -> {state};\n"));
        }
        for &state in &self.states {
            for (symbol, targets) in self.transitions.row(state) {
                for (priority, &target) in targets.iter().enumerate() {
                    out.push_str(&format!(
                        "\t{} -> {} [taillabel = \"{}\", label = \"{}\"];\n",
                        state,
                        target,
                        priority + 1,
                        dot_escape(&symbol.to_string())
                    ));
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn analyze_pattern(pattern: &str) -> Analysis {
        analyze(pattern, Flags::default())
            .unwrap_or_else(|e| panic!("analysis of {pattern:?} failed: {e}"))
    }

    fn build_enfa(pattern: &str) -> EpsilonNfa {
        EpsilonNfa::parse(pattern, Flags::default())
            .unwrap_or_else(|e| panic!("building {pattern:?} failed: {e}"))
    }

    fn build_nfa(pattern: &str) -> OrderedNfa {
        build_enfa(pattern).eliminate()
    }

    fn build_pruned(pattern: &str) -> (OrderedNfa, Dfa, PrunedNfa) {
        let nfa = build_nfa(pattern);
        let dfa = Dfa::determinize(&nfa.reverse());
        let pruned = PrunedNfa::build(&nfa, &dfa);
        (nfa, dfa, pruned)
    }

    fn assert_safe(pattern: &str) {
        assert!(
            analyze_pattern(pattern).is_safe(),
            "expected {pattern:?} to be safe"
        );
    }

    fn assert_vulnerable(pattern: &str, ambiguity: Ambiguity) -> Finding {
        match analyze_pattern(pattern) {
            Analysis::Vulnerable(finding) => {
                assert_eq!(
                    finding.ambiguity, ambiguity,
                    "wrong ambiguity degree for {pattern:?}"
                );
                finding
            }
            Analysis::Safe => panic!("expected {pattern:?} to be vulnerable"),
        }
    }

    // -----------------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------------

    #[test]
    fn test_flags_from_js() {
        assert_eq!(Flags::from_js("").expect("empty"), Flags::default());
        let flags = Flags::from_js("is").expect("is");
        assert!(flags.ignore_case && flags.dot_all);
        let flags = Flags::from_js("gim").expect("gim");
        assert!(flags.ignore_case && !flags.dot_all);
        assert!(matches!(Flags::from_js("x"), Err(Error::UnknownFlag('x'))));
    }

    // -----------------------------------------------------------------------
    // Alphabet and symbol sets
    // -----------------------------------------------------------------------

    #[test]
    fn test_alphabet_collects_literals_and_sentinel() {
        let enfa = build_enfa("ab");
        assert_eq!(
            enfa.alphabet().symbols(),
            [Symbol::Char('a'), Symbol::Char('b'), Symbol::Other]
        );
    }

    #[test]
    fn test_alphabet_folds_case() {
        let flags = Flags::from_js("i").expect("flags");
        let enfa = EpsilonNfa::parse("Ab", flags).expect("pattern");
        assert_eq!(
            enfa.alphabet().symbols(),
            [Symbol::Char('a'), Symbol::Char('b'), Symbol::Other]
        );
    }

    #[test]
    fn test_alphabet_uses_range_endpoints() {
        let enfa = build_enfa("[b-d]");
        assert_eq!(
            enfa.alphabet().symbols(),
            [Symbol::Char('b'), Symbol::Char('d'), Symbol::Other]
        );
    }

    #[test]
    fn test_alphabet_always_carries_the_sentinel() {
        let enfa = build_enfa("ab");
        assert!(!enfa.alphabet().is_empty());
        assert_eq!(enfa.alphabet().len(), 3);
        assert_eq!(enfa.alphabet().symbols().last(), Some(&Symbol::Other));

        // Even a pattern with no characters at all keeps the sentinel.
        let enfa = build_enfa("(?:)");
        assert!(!enfa.alphabet().is_empty());
        assert_eq!(enfa.alphabet().symbols(), [Symbol::Other]);
    }

    fn initial_symbol_set(enfa: &EpsilonNfa) -> &SymbolSet {
        let edges = enfa.edges(enfa.initial());
        assert_eq!(edges.len(), 1, "expected a single atom at the initial state");
        edges[0].label().expect("expected a symbol edge")
    }

    #[test]
    fn test_negated_class_subtracts_from_alphabet() {
        let enfa = build_enfa("^[^a]$");
        assert_eq!(initial_symbol_set(&enfa).symbols(), [Symbol::Other]);
    }

    #[test]
    fn test_class_without_outside_matches_omits_sentinel() {
        let flags = Flags::from_js("i").expect("flags");
        let enfa = EpsilonNfa::parse("^[a-c]B$", flags).expect("pattern");
        assert_eq!(
            initial_symbol_set(&enfa).symbols(),
            [Symbol::Char('a'), Symbol::Char('b'), Symbol::Char('c')]
        );
    }

    #[test]
    fn test_folded_uppercase_range_omits_sentinel() {
        // Every scalar in A-C is represented by its lowercase partner,
        // so the range matches nothing outside the alphabet.
        let flags = Flags::from_js("i").expect("flags");
        let enfa = EpsilonNfa::parse("^[A-C]abc$", flags).expect("pattern");
        assert_eq!(
            initial_symbol_set(&enfa).symbols(),
            [Symbol::Char('a'), Symbol::Char('b'), Symbol::Char('c')]
        );
    }

    #[test]
    fn test_escape_class_resolution() {
        let enfa = build_enfa("^\\d0$");
        assert_eq!(
            initial_symbol_set(&enfa).symbols(),
            [Symbol::Char('0'), Symbol::Other]
        );
    }

    #[test]
    fn test_negated_escape_class_subtracts() {
        // \d matches digits outside the alphabet, so its resolution owns
        // the sentinel and the subtraction leaves nothing for \D.
        let enfa = build_enfa("^\\D0$");
        assert!(initial_symbol_set(&enfa).is_empty());
    }

    #[test]
    fn test_dot_excludes_newline_without_dot_all() {
        let enfa = build_enfa("^.\n$");
        assert_eq!(initial_symbol_set(&enfa).symbols(), [Symbol::Other]);
        let flags = Flags::from_js("s").expect("flags");
        let enfa = EpsilonNfa::parse("^.\n$", flags).expect("pattern");
        assert_eq!(
            initial_symbol_set(&enfa).symbols(),
            [Symbol::Char('\n'), Symbol::Other]
        );
    }

    #[test]
    fn test_symbol_display() {
        assert_eq!(Symbol::Char('a').to_string(), "a");
        assert_eq!(Symbol::Char('\n').to_string(), "U+000A");
        assert_eq!(Symbol::Other.to_string(), "∗");
        assert_eq!(StateId(3).to_string(), "q3");
        assert_eq!(DfaStateId(0).to_string(), "Q0");
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[test]
    fn test_unsupported_constructs() {
        let cases = [
            ("a{2,3}", Construct::BoundedRepetition),
            ("\\bfoo", Construct::WordBoundary),
            ("\\p{Greek}", Construct::UnicodeProperty),
            ("[[:alpha:]]", Construct::PosixClass),
            ("[a--b]", Construct::ClassSetOperation),
            ("[[a]b]", Construct::NestedClass),
            ("(?i)a", Construct::InlineFlags),
            ("(?i:a)", Construct::InlineFlags),
        ];
        for (pattern, expected) in cases {
            match analyze(pattern, Flags::default()) {
                Err(Error::Unsupported(c)) => {
                    assert_eq!(c, expected, "wrong construct for {pattern:?}")
                }
                other => panic!("expected unsupported-construct error for {pattern:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_misplaced_anchors() {
        for pattern in ["a^b", "^ab^c", "(^a)b", "a$b"] {
            assert!(
                matches!(analyze(pattern, Flags::default()), Err(Error::MisplacedAnchor)),
                "expected misplaced-anchor error for {pattern:?}"
            );
        }
        // Valid positions, including per branch of a top-level alternation.
        assert!(analyze("^a$|b", Flags::default()).is_ok());
        assert!(analyze("^^a$", Flags::default()).is_ok());
    }

    #[test]
    fn test_syntax_errors_carry_parser_diagnostics() {
        assert!(matches!(analyze("(a", Flags::default()), Err(Error::Syntax(_))));
        match analyze("(a)\\1", Flags::default()) {
            Err(e @ Error::Syntax(_)) => {
                assert!(e.to_string().contains("backreference"), "got: {e}")
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
        match analyze("(?=a)b", Flags::default()) {
            Err(e @ Error::Syntax(_)) => {
                assert!(e.to_string().contains("look-around"), "got: {e}")
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let msg = Error::Unsupported(Construct::WordBoundary).to_string();
        assert!(msg.contains("word boundary"), "got: {msg}");
        let msg = Error::MisplacedAnchor.to_string();
        assert!(msg.contains("anchor"), "got: {msg}");
    }

    // -----------------------------------------------------------------------
    // Thompson construction
    // -----------------------------------------------------------------------

    #[test]
    fn test_enfa_fragment_invariants() {
        for pattern in ["^(a|b)c*$", "a|b", "^(a*)*$", "(?:a|bc)"] {
            let enfa = build_enfa(pattern);
            for state in 0..enfa.state_count() {
                for edge in enfa.edges(StateId(state as u32)) {
                    assert_ne!(
                        edge.target(),
                        enfa.initial(),
                        "initial state of {pattern:?} must have no incoming edges"
                    );
                }
            }
            assert!(
                enfa.edges(enfa.accepting()).is_empty(),
                "accepting state of {pattern:?} must have no outgoing edges"
            );
        }
    }

    #[test]
    fn test_star_priority_greedy_vs_lazy() {
        let greedy = build_enfa("^a*$");
        let first = greedy.edges(greedy.initial())[0].target();
        assert_ne!(first, greedy.accepting(), "greedy star enters the loop first");

        let lazy = build_enfa("^a*?$");
        let first = lazy.edges(lazy.initial())[0].target();
        assert_eq!(first, lazy.accepting(), "lazy star exits first");
    }

    #[test]
    fn test_alternation_priority_is_source_order() {
        let nfa = build_nfa("^(a|b)$");
        let (symbol, _) = nfa
            .transitions()
            .row(nfa.initial())
            .next()
            .expect("initial state has transitions");
        assert_eq!(symbol, Symbol::Char('a'));
    }

    // -----------------------------------------------------------------------
    // Epsilon elimination
    // -----------------------------------------------------------------------

    #[test]
    fn test_eliminate_simple_concat() {
        let nfa = build_nfa("^ab$");
        assert_eq!(nfa.states().len(), 3);
        assert_eq!(nfa.accepting().len(), 1);
        let mid = nfa.transitions().targets(nfa.initial(), Symbol::Char('a'));
        assert_eq!(mid.len(), 1);
        let last = nfa.transitions().targets(mid[0], Symbol::Char('b'));
        assert_eq!(last.len(), 1);
        assert!(nfa.accepting().contains(&last[0]));
    }

    #[test]
    fn test_eliminate_no_epsilon_input_is_stable() {
        let enfa = build_enfa("^a$");
        assert!(enfa
            .edges(enfa.initial())
            .iter()
            .all(|e| !e.is_epsilon()));
        let nfa = enfa.eliminate();
        assert_eq!(nfa.states().len(), 2);
        let targets = nfa.transitions().targets(nfa.initial(), Symbol::Char('a'));
        assert_eq!(targets.len(), 1);
        assert!(nfa.accepting().contains(&targets[0]));
    }

    #[test]
    fn test_eliminate_keeps_duplicate_alternatives() {
        // Two distinct epsilon routes from the loop state reach the same
        // symbol edge; both copies must survive.
        let nfa = build_nfa("^(a*)*$");
        let duplicated = nfa.states().iter().any(|&q| {
            let targets = nfa.transitions().targets(q, Symbol::Char('a'));
            targets.len() == 2 && targets[0] == targets[1]
        });
        assert!(duplicated, "duplicate closure items were collapsed");
    }

    // -----------------------------------------------------------------------
    // Reversal and determinization
    // -----------------------------------------------------------------------

    #[test]
    fn test_reverse_flips_edges_and_roles() {
        let nfa = build_nfa("^ab$");
        let rev = nfa.reverse();
        assert_eq!(rev.accepting(), nfa.initial());
        assert_eq!(rev.initial().len(), nfa.accepting().len());
        assert_eq!(rev.transitions().edge_count(), nfa.transitions().edge_count());
        for (source, symbol, target) in nfa.transitions().iter() {
            assert!(
                rev.targets(target, symbol).contains(&source),
                "missing reversed edge for {source} --{symbol}--> {target}"
            );
        }
    }

    #[test]
    fn test_determinize_is_total_with_empty_subset() {
        let (_, dfa, _) = build_pruned("^a$");
        for id in dfa.state_ids() {
            for &symbol in dfa.alphabet().symbols() {
                assert!(dfa.target(id, symbol).is_some(), "missing transition");
            }
        }
        let empty = dfa
            .state_ids()
            .find(|&id| dfa.subset(id).is_empty())
            .expect("empty subset is a real state");
        for &symbol in dfa.alphabet().symbols() {
            assert_eq!(dfa.target(empty, symbol), Some(empty));
        }
    }

    #[test]
    fn test_determinize_merges_subsets_by_value() {
        let nfa = build_nfa("^(a|b)$");
        let dfa = Dfa::determinize(&nfa.reverse());
        // {accepting pair}, {initial}, and the empty subset.
        assert_eq!(dfa.state_count(), 3);
        assert_eq!(
            dfa.target(dfa.initial(), Symbol::Char('a')),
            dfa.target(dfa.initial(), Symbol::Char('b'))
        );
        assert_eq!(dfa.accepting().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Pruning
    // -----------------------------------------------------------------------

    #[test]
    fn test_pruning_narrows_alphabet() {
        let (_, _, pruned) = build_pruned("^ab$");
        assert_eq!(pruned.alphabet(), [Symbol::Char('a'), Symbol::Char('b')]);
        assert!(pruned.full_alphabet().symbols().contains(&Symbol::Other));
    }

    #[test]
    fn test_pruning_bounds_the_state_space() {
        let (nfa, dfa, pruned) = build_pruned("^(a|b)*$");
        assert!(pruned.states().len() <= nfa.states().len() * dfa.state_count());
        for &p in pruned.initial() {
            let (q, _) = pruned.components(p);
            assert_eq!(q, nfa.initial());
        }
        for &p in pruned.accepting() {
            let (_, d) = pruned.components(p);
            assert_eq!(d, dfa.initial());
        }
    }

    #[test]
    fn test_pruning_stops_after_settled_alternative() {
        // (a|a): in a context where the first branch accepts, the second
        // is unreachable for the engine and its edge must be dropped.
        let (_, _, pruned) = build_pruned("^(a|a)$");
        assert_eq!(pruned.accepting().len(), 1);
        assert_eq!(pruned.transitions().edge_count(), 5);
    }

    // -----------------------------------------------------------------------
    // Strongly connected components
    // -----------------------------------------------------------------------

    #[test]
    fn test_scc_partitions_states() {
        let (_, _, pruned) = build_pruned("^(a|b)*$");
        let sccs = strongly_connected_components(&pruned);
        let mut seen: HashSet<PairId> = HashSet::new();
        let mut total = 0;
        for comp in &sccs {
            for &state in comp.states() {
                assert!(seen.insert(state), "state in two components");
                total += 1;
            }
        }
        assert_eq!(total, pruned.states().len());
    }

    #[test]
    fn test_scc_on_hand_built_graph() {
        let mut transitions = TransitionMap::new();
        transitions.add(PairId(0), Symbol::Char('a'), PairId(1));
        transitions.add(PairId(1), Symbol::Char('a'), PairId(0));
        transitions.add(PairId(1), Symbol::Char('b'), PairId(2));
        let graph = SccGraph {
            states: vec![PairId(0), PairId(1), PairId(2)],
            alphabet: Box::new([Symbol::Char('a'), Symbol::Char('b')]),
            transitions,
        };
        let comps = strongly_connected_components(&graph);
        assert_eq!(comps.len(), 2);
        let cycle = comps
            .iter()
            .find(|c| c.states().len() == 2)
            .expect("cycle component");
        assert!(cycle.contains(PairId(0)) && cycle.contains(PairId(1)));
        assert_eq!(cycle.transitions().edge_count(), 2, "induced edges only");
    }

    #[test]
    fn test_scc_preserves_parallel_self_loops() {
        let mut transitions = TransitionMap::new();
        transitions.add(PairId(7), Symbol::Char('a'), PairId(7));
        transitions.add(PairId(7), Symbol::Char('a'), PairId(7));
        let graph = SccGraph {
            states: vec![PairId(7)],
            alphabet: Box::new([Symbol::Char('a')]),
            transitions,
        };
        let comps = strongly_connected_components(&graph);
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].transitions().edge_count(), 2);
    }

    // -----------------------------------------------------------------------
    // Products and detection
    // -----------------------------------------------------------------------

    #[test]
    fn test_product_squares_a_component() {
        let mut transitions = TransitionMap::new();
        transitions.add(PairId(0), Symbol::Char('a'), PairId(1));
        transitions.add(PairId(1), Symbol::Char('a'), PairId(0));
        let scc = SccGraph {
            states: vec![PairId(0), PairId(1)],
            alphabet: Box::new([Symbol::Char('a')]),
            transitions,
        };
        let product = ProductGraph::build(&scc);
        assert_eq!(product.state_list().len(), 4);
        assert_eq!(product.transitions().edge_count(), 4);
        assert!(product
            .state_list()
            .iter()
            .any(|&p| product.components(p) == (PairId(0), PairId(0))));
    }

    #[test]
    fn test_find_eda_reports_parallel_loop_pump() {
        let (_, _, pruned) = build_pruned("^(a*)*$");
        let sccs = strongly_connected_components(&pruned);
        let witness = find_eda(&sccs)
            .expect("no invariant breach")
            .expect("eda witness");
        assert_eq!(witness.pump, [Symbol::Char('a')]);
    }

    #[test]
    fn test_find_ida_reports_shifting_pair() {
        let (_, _, pruned) = build_pruned("^a*a*$");
        let sccs = strongly_connected_components(&pruned);
        assert!(find_eda(&sccs).expect("no invariant breach").is_none());
        let witness = find_ida(&pruned, &sccs)
            .expect("no invariant breach")
            .expect("ida witness");
        assert_ne!(witness.from, witness.to);
    }

    // -----------------------------------------------------------------------
    // Verdicts
    // -----------------------------------------------------------------------

    #[test]
    fn test_safe_patterns() {
        for pattern in [
            "a",
            "ab",
            "a|b",
            "^ab$",
            "a*",
            "a*?",
            "(?:a|bc)",
            "(a|b)*",
            "^(a|b)*$",
            "(a+)+",
            "^[a-z][0-9a-z]*$",
            "^a*$",
            "^$",
            ".",
            "\\s",
            "(?:)",
            "(a?)?",
            "^a|b$|aa",
            "(.*|(a|a)*)",
            "(a|a)*?.*",
        ] {
            assert_safe(pattern);
        }
    }

    #[test]
    fn test_exponential_patterns() {
        for pattern in ["^(a*)*$", "^(a+)+$", "^(a*)+$", "^(a|a)*$", "(a*)*$"] {
            assert_vulnerable(pattern, Ambiguity::Exponential);
        }
    }

    #[test]
    fn test_polynomial_patterns() {
        for pattern in ["^a*a*$", "(a|b)*$"] {
            assert_vulnerable(pattern, Ambiguity::Polynomial);
        }
    }

    #[test]
    fn test_exponential_wins_over_polynomial() {
        // Contains both an IDA pair (the two stars in sequence) and an
        // EDA loop; the exponential verdict must be the one reported.
        let finding = assert_vulnerable("^a*a*(b|b)*$", Ambiguity::Exponential);
        assert!(finding.message.contains("exponential"), "got: {}", finding.message);
    }

    #[test]
    fn test_sentinel_conflates_escape_classes() {
        // \w and \d overlap on digits while \d and \s are disjoint, but
        // every escape here resolves to the sentinel alone, so the
        // analysis sees the same two-copy loop either way. With no
        // concrete symbol the pattern accepts every input and pruning
        // removes the duplicate; a concrete tail creates failing
        // contexts and the copies survive as an exponential finding.
        assert_safe("^(\\w|\\d)*$");
        assert_safe("^(\\d|\\s)*$");
        assert_vulnerable("^(\\d|\\s)*X$", Ambiguity::Exponential);
    }

    #[test]
    fn test_wildcard_loops_bridged_by_literals() {
        // The two .* loops interact only through the literals between
        // them, and the shift search requires the loops to touch through
        // a single edge, so the anchored form is not flagged. Unanchored,
        // the position-scan loop sits directly next to the first .* and
        // that adjacent pair is reported.
        assert_safe("^(.*)=\"(.*)\"$");
        assert_vulnerable("(.*)=\"(.*)\"", Ambiguity::Polynomial);
    }

    #[test]
    fn test_folded_pattern_is_safe() {
        let flags = Flags::from_js("i").expect("flags");
        assert!(analyze("a[a-z]", flags).expect("analysis").is_safe());
    }

    // -----------------------------------------------------------------------
    // Attack strings
    // -----------------------------------------------------------------------

    #[test]
    fn test_exponential_attack_string() {
        let finding = assert_vulnerable("^(a*)*$", Ambiguity::Exponential);
        let attack = finding.attack.expect("attack string");
        assert!(attack.len() > PUMP_REPEAT);
        assert!(attack.ends_with('!'), "got: {attack:?}");
        assert!(attack[..attack.len() - 1].chars().all(|c| c == 'a'));

        let oracle = regex::Regex::new("^(a*)*$").expect("oracle");
        assert!(!oracle.is_match(&attack), "attack must not match: {attack:?}");
        assert!(oracle.is_match(&"a".repeat(PUMP_REPEAT)));
    }

    #[test]
    fn test_polynomial_attack_string() {
        let finding = assert_vulnerable("^a*a*$", Ambiguity::Polynomial);
        assert!(finding.message.contains("polynomial"), "got: {}", finding.message);
        let attack = finding.attack.expect("attack string");
        assert!(attack.ends_with('!'), "got: {attack:?}");
        assert!(attack[..attack.len() - 1].chars().all(|c| c == 'a'));
        let oracle = regex::Regex::new("^a*a*$").expect("oracle");
        assert!(!oracle.is_match(&attack), "attack must not match: {attack:?}");
    }

    #[test]
    fn test_attack_absent_when_every_input_matches() {
        // Unanchored at the start, `(a*)*$` accepts any input (the search
        // loop consumes everything, the stars match empty at the end), so
        // no suffix can force failure; the finding stands without one.
        let finding = assert_vulnerable("(a*)*$", Ambiguity::Exponential);
        assert!(finding.attack.is_none());
    }

    // -----------------------------------------------------------------------
    // DOT output
    // -----------------------------------------------------------------------

    #[test]
    fn test_dot_output_shape() {
        let enfa = build_enfa("^a$");
        let dot = enfa.to_dot(DotOptions::default());
        assert!(dot.starts_with("digraph {\n"));
        assert!(dot.ends_with("}\n"));
        assert!(!dot.contains("rankdir"));
        assert!(dot.contains("_init [shape = point];"));
        assert!(dot.contains("doublecircle"));
        assert!(dot.contains("taillabel = \"1\""));

        let dot = enfa.to_dot(DotOptions { horizontal: true });
        assert!(dot.contains("rankdir = LR"));
    }

    #[test]
    fn test_dot_reversed_has_no_priorities() {
        let nfa = build_nfa("^(a|b)$");
        let dot = nfa.reverse().to_dot(DotOptions::default());
        assert!(!dot.contains("taillabel"));
    }

    #[test]
    fn test_dot_pruned_labels_pairs() {
        let (_, _, pruned) = build_pruned("^a$");
        let dot = pruned.to_dot(DotOptions::default());
        assert!(dot.contains("label = \"(q0, "), "got:\n{dot}");
    }

    // -----------------------------------------------------------------------
    // Transition map
    // -----------------------------------------------------------------------

    #[test]
    fn test_transition_map_preserves_order_and_duplicates() {
        let mut map = TransitionMap::new();
        map.add(StateId(0), Symbol::Char('a'), StateId(2));
        map.add(StateId(0), Symbol::Char('a'), StateId(1));
        map.add(StateId(0), Symbol::Char('a'), StateId(2));
        assert_eq!(
            map.targets(StateId(0), Symbol::Char('a')),
            [StateId(2), StateId(1), StateId(2)]
        );
        assert!(map.targets(StateId(1), Symbol::Char('a')).is_empty());
        assert_eq!(map.edge_count(), 3);

        let rev = map.reversed();
        assert_eq!(rev.targets(StateId(2), Symbol::Char('a')), [StateId(0), StateId(0)]);
    }
}
