// Mapping di quadrati: A1=0, B1=1, ..., H8=63
// Lo stesso mapping è usato ovunque: bitboard, notazione, bridge engine.

use crate::error::RulesError;
use crate::utils::{
    king_attacks, knight_attacks, pop_lsb, ray_first_hit, ray_squares, DIAGONAL_DIRS,
    NOT_FILE_A, NOT_FILE_H, ORTHOGONAL_DIRS, RANK_1, RANK_2, RANK_7, RANK_8,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White = 0,
    Black = 1,
}

impl Color {
    #[inline]
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PieceKind {
    Pawn = 0,
    Knight = 1,
    Bishop = 2,
    Rook = 3,
    Queen = 4,
    King = 5,
}

impl PieceKind {
    fn from_nibble(v: u32) -> Option<PieceKind> {
        match v {
            0 => Some(PieceKind::Pawn),
            1 => Some(PieceKind::Knight),
            2 => Some(PieceKind::Bishop),
            3 => Some(PieceKind::Rook),
            4 => Some(PieceKind::Queen),
            5 => Some(PieceKind::King),
            _ => None,
        }
    }
}

// Indice nel piece_bb array: white piece = kind; black piece = 6 + kind
#[inline]
fn piece_index(kind: PieceKind, color: Color) -> usize {
    (color as usize) * 6 + (kind as usize)
}

pub type Move = u32;

// Codifica mosse: 32-bit layout
// Bits 0-5: from (0-63)
// Bits 6-11: to (0-63)
// Bits 12-15: piece (0-5)
// Bits 16-19: captured (0-5, 0xF = none)
// Bits 20-23: promotion (0-5, 0xF = none)
// Bits 24-31: flags
pub const FLAG_NONE: u32 = 0;
pub const FLAG_EN_PASSANT: u32 = 1 << 24;
pub const FLAG_CASTLE_KING: u32 = 1 << 25;
pub const FLAG_CASTLE_QUEEN: u32 = 1 << 26;
pub const FLAG_PROMOTION: u32 = 1 << 27;
pub const FLAG_CAPTURE: u32 = 1 << 28;

pub fn move_from_sq(m: Move) -> usize {
    (m & 0x3F) as usize
}

pub fn move_to_sq(m: Move) -> usize {
    ((m >> 6) & 0x3F) as usize
}

pub fn move_piece(m: Move) -> PieceKind {
    PieceKind::from_nibble((m >> 12) & 0xF).unwrap_or(PieceKind::Pawn)
}

pub fn move_captured(m: Move) -> Option<PieceKind> {
    PieceKind::from_nibble((m >> 16) & 0xF)
}

pub fn move_promotion(m: Move) -> Option<PieceKind> {
    PieceKind::from_nibble((m >> 20) & 0xF)
}

pub fn move_flag(m: Move, flag: u32) -> bool {
    (m & flag) != 0
}

pub fn new_move(
    from: usize,
    to: usize,
    piece: PieceKind,
    captured: Option<PieceKind>,
    promotion: Option<PieceKind>,
    flags: u32,
) -> Move {
    let cap = captured.map(|p| p as u32).unwrap_or(0xF);
    let prom = promotion.map(|p| p as u32).unwrap_or(0xF);
    (from as u32 & 0x3F)
        | ((to as u32 & 0x3F) << 6)
        | ((piece as u32 & 0xF) << 12)
        | ((cap & 0xF) << 16)
        | ((prom & 0xF) << 20)
        | flags
}

// Castling right bits: K Q k q
pub const CASTLE_WK: u8 = 0b1000;
pub const CASTLE_WQ: u8 = 0b0100;
pub const CASTLE_BK: u8 = 0b0010;
pub const CASTLE_BQ: u8 = 0b0001;

// Diritti persi quando una mossa tocca (from o to) una di queste caselle.
// Revoca monotona: i bit si azzerano e non vengono mai ripristinati.
fn castling_mask(sq: usize) -> u8 {
    match sq {
        0 => !CASTLE_WQ,
        4 => !(CASTLE_WK | CASTLE_WQ),
        7 => !CASTLE_WK,
        56 => !CASTLE_BQ,
        60 => !(CASTLE_BK | CASTLE_BQ),
        63 => !CASTLE_BK,
        _ => 0xFF,
    }
}

/// Convert a square index (0-63) to text (e.g. 0 -> "a1", 63 -> "h8")
pub fn square_to_text(sq: usize) -> String {
    let file = (b'a' + (sq % 8) as u8) as char;
    let rank = (b'1' + (sq / 8) as u8) as char;
    format!("{}{}", file, rank)
}

/// Convert square text to an index (e.g. "e2" -> 12)
pub fn text_to_square(text: &str) -> Result<usize, RulesError> {
    let bytes = text.as_bytes();
    if bytes.len() != 2
        || !(b'a'..=b'h').contains(&bytes[0])
        || !(b'1'..=b'8').contains(&bytes[1])
    {
        return Err(RulesError::MalformedNotation(format!(
            "bad square '{}'",
            text
        )));
    }
    Ok(((bytes[1] - b'1') as usize) * 8 + (bytes[0] - b'a') as usize)
}

fn promo_letter(kind: PieceKind) -> char {
    match kind {
        PieceKind::Knight => 'n',
        PieceKind::Bishop => 'b',
        PieceKind::Rook => 'r',
        _ => 'q',
    }
}

fn letter_promo(ch: char) -> Option<PieceKind> {
    match ch {
        'q' => Some(PieceKind::Queen),
        'r' => Some(PieceKind::Rook),
        'b' => Some(PieceKind::Bishop),
        'n' => Some(PieceKind::Knight),
        _ => None,
    }
}

/// Format a Move as 4/5-char text ("e2e4", "e7e8q")
pub fn move_to_text(m: Move) -> String {
    let mut text = format!(
        "{}{}",
        square_to_text(move_from_sq(m)),
        square_to_text(move_to_sq(m))
    );
    if let Some(promo) = move_promotion(m) {
        text.push(promo_letter(promo));
    }
    text
}

/// Validate move text against the 4/5-char grammar without consulting a
/// position: source square, destination square, optional promotion letter.
pub fn parse_move_text(text: &str) -> Result<(usize, usize, Option<PieceKind>), RulesError> {
    if !text.is_ascii() || text.len() < 4 || text.len() > 5 {
        return Err(RulesError::MalformedNotation(format!(
            "bad move text '{}'",
            text
        )));
    }
    let from = text_to_square(&text[0..2])?;
    let to = text_to_square(&text[2..4])?;
    let promotion = match text.chars().nth(4) {
        None => None,
        Some(ch) => Some(letter_promo(ch).ok_or_else(|| {
            RulesError::MalformedNotation(format!("bad promotion letter in '{}'", text))
        })?),
    };
    Ok((from, to, promotion))
}

fn piece_letter(kind: PieceKind, color: Color) -> char {
    let ch = match kind {
        PieceKind::Pawn => 'p',
        PieceKind::Knight => 'n',
        PieceKind::Bishop => 'b',
        PieceKind::Rook => 'r',
        PieceKind::Queen => 'q',
        PieceKind::King => 'k',
    };
    match color {
        Color::White => ch.to_ascii_uppercase(),
        Color::Black => ch,
    }
}

fn letter_piece(ch: char) -> Option<(PieceKind, Color)> {
    let color = if ch.is_ascii_uppercase() {
        Color::White
    } else {
        Color::Black
    };
    let kind = match ch.to_ascii_lowercase() {
        'p' => PieceKind::Pawn,
        'n' => PieceKind::Knight,
        'b' => PieceKind::Bishop,
        'r' => PieceKind::Rook,
        'q' => PieceKind::Queen,
        'k' => PieceKind::King,
        _ => return None,
    };
    Some((kind, color))
}

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Immutable board snapshot. Every mutation path returns a new value; a
/// retained Position is never touched, so before/after pairs stay valid
/// across overlapping analysis requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    // 12 bitboard: 0-5 = white p,n,b,r,q,k; 6-11 = black
    piece_bb: [u64; 12],
    white_occ: u64,
    black_occ: u64,
    occ: u64,
    pub side: Color,
    pub castling: u8, // bits: CASTLE_WK | CASTLE_WQ | CASTLE_BK | CASTLE_BQ
    pub ep: Option<u8>,
    pub halfmove: u16,
    pub fullmove: u16,
    white_king_sq: u8,
    black_king_sq: u8,
}

impl Position {
    fn empty() -> Self {
        Self {
            piece_bb: [0; 12],
            white_occ: 0,
            black_occ: 0,
            occ: 0,
            side: Color::White,
            castling: 0,
            ep: None,
            halfmove: 0,
            fullmove: 1,
            white_king_sq: 0,
            black_king_sq: 0,
        }
    }

    pub fn startpos() -> Self {
        Self::from_fen(START_FEN).expect("start position FEN is valid")
    }

    pub fn piece_bb(&self, kind: PieceKind, color: Color) -> u64 {
        self.piece_bb[piece_index(kind, color)]
    }

    pub fn piece_on(&self, sq: usize) -> Option<(PieceKind, Color)> {
        let mask = 1u64 << sq;
        if self.occ & mask == 0 {
            return None;
        }
        let color = if self.white_occ & mask != 0 {
            Color::White
        } else {
            Color::Black
        };
        for kind in [
            PieceKind::Pawn,
            PieceKind::Knight,
            PieceKind::Bishop,
            PieceKind::Rook,
            PieceKind::Queen,
            PieceKind::King,
        ] {
            if self.piece_bb(kind, color) & mask != 0 {
                return Some((kind, color));
            }
        }
        None
    }

    pub fn is_occupied(&self, sq: usize) -> bool {
        self.occ & (1u64 << sq) != 0
    }

    pub fn king_sq(&self, color: Color) -> usize {
        match color {
            Color::White => self.white_king_sq as usize,
            Color::Black => self.black_king_sq as usize,
        }
    }

    fn occ_of(&self, color: Color) -> u64 {
        match color {
            Color::White => self.white_occ,
            Color::Black => self.black_occ,
        }
    }

    fn set_piece(&mut self, sq: usize, kind: PieceKind, color: Color) {
        self.piece_bb[piece_index(kind, color)] |= 1u64 << sq;
        if kind == PieceKind::King {
            match color {
                Color::White => self.white_king_sq = sq as u8,
                Color::Black => self.black_king_sq = sq as u8,
            }
        }
    }

    fn remove_piece(&mut self, sq: usize, kind: PieceKind, color: Color) {
        self.piece_bb[piece_index(kind, color)] &= !(1u64 << sq);
    }

    fn refresh_occupancy(&mut self) {
        self.white_occ = 0;
        self.black_occ = 0;
        for i in 0..6 {
            self.white_occ |= self.piece_bb[i];
        }
        for i in 6..12 {
            self.black_occ |= self.piece_bb[i];
        }
        self.occ = self.white_occ | self.black_occ;
    }
}

// FEN codec -----------------------------------------------------------

impl Position {
    /// Parse the 6-field position notation. Rejects anything that does not
    /// match the grammar exactly; nothing malformed ever reaches the board.
    pub fn from_fen(fen: &str) -> Result<Self, RulesError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        let &[board_field, side_field, castle_field, ep_field, half_field, full_field] =
            fields.as_slice()
        else {
            return Err(RulesError::MalformedNotation(format!(
                "expected 6 fields, got {}",
                fields.len()
            )));
        };

        let mut pos = Self::empty();

        // Campo scacchiera: rank8 .. rank1, ogni rank somma esattamente a 8
        let ranks: Vec<&str> = board_field.split('/').collect();
        if ranks.len() != 8 {
            return Err(RulesError::MalformedNotation(format!(
                "expected 8 ranks, got {}",
                ranks.len()
            )));
        }
        for (i, rank_part) in ranks.iter().enumerate() {
            let rank = 7 - i;
            let mut file = 0usize;
            for ch in rank_part.chars() {
                if let Some(d) = ch.to_digit(10) {
                    if !(1..=8).contains(&d) {
                        return Err(RulesError::MalformedNotation(format!(
                            "bad empty-run digit '{}' in rank {}",
                            ch,
                            rank + 1
                        )));
                    }
                    file += d as usize;
                } else {
                    let (kind, color) = letter_piece(ch).ok_or_else(|| {
                        RulesError::MalformedNotation(format!("bad piece letter '{}'", ch))
                    })?;
                    if file >= 8 {
                        return Err(RulesError::MalformedNotation(format!(
                            "rank {} overflows 8 files",
                            rank + 1
                        )));
                    }
                    pos.set_piece(rank * 8 + file, kind, color);
                    file += 1;
                }
                if file > 8 {
                    return Err(RulesError::MalformedNotation(format!(
                        "rank {} overflows 8 files",
                        rank + 1
                    )));
                }
            }
            if file != 8 {
                return Err(RulesError::MalformedNotation(format!(
                    "rank {} sums to {} files, expected 8",
                    rank + 1,
                    file
                )));
            }
        }
        pos.refresh_occupancy();

        pos.side = match side_field {
            "w" => Color::White,
            "b" => Color::Black,
            other => {
                return Err(RulesError::MalformedNotation(format!(
                    "bad side-to-move '{}'",
                    other
                )))
            }
        };

        if castle_field != "-" {
            for ch in castle_field.chars() {
                let bit = match ch {
                    'K' => CASTLE_WK,
                    'Q' => CASTLE_WQ,
                    'k' => CASTLE_BK,
                    'q' => CASTLE_BQ,
                    other => {
                        return Err(RulesError::MalformedNotation(format!(
                            "bad castling letter '{}'",
                            other
                        )))
                    }
                };
                if pos.castling & bit != 0 {
                    return Err(RulesError::MalformedNotation(format!(
                        "duplicate castling letter '{}'",
                        ch
                    )));
                }
                pos.castling |= bit;
            }
        }

        pos.ep = match ep_field {
            "-" => None,
            square => {
                let sq = text_to_square(square)?;
                let rank = sq / 8;
                if rank != 2 && rank != 5 {
                    return Err(RulesError::MalformedNotation(format!(
                        "en-passant square '{}' not on rank 3 or 6",
                        square
                    )));
                }
                Some(sq as u8)
            }
        };

        pos.halfmove = parse_clock(half_field, "halfmove")?;
        pos.fullmove = parse_clock(full_field, "fullmove")?;
        if pos.fullmove == 0 {
            return Err(RulesError::MalformedNotation(
                "fullmove number must be positive".to_string(),
            ));
        }

        Ok(pos)
    }

    /// Deterministic inverse of `from_fen`; round-trips byte for byte.
    pub fn to_fen(&self) -> String {
        let mut out = String::with_capacity(80);
        for rank in (0..8).rev() {
            let mut empty_run = 0u32;
            for file in 0..8 {
                match self.piece_on(rank * 8 + file) {
                    Some((kind, color)) => {
                        if empty_run > 0 {
                            out.push(char::from_digit(empty_run, 10).unwrap_or('8'));
                            empty_run = 0;
                        }
                        out.push(piece_letter(kind, color));
                    }
                    None => empty_run += 1,
                }
            }
            if empty_run > 0 {
                out.push(char::from_digit(empty_run, 10).unwrap_or('8'));
            }
            if rank > 0 {
                out.push('/');
            }
        }

        out.push(' ');
        out.push(match self.side {
            Color::White => 'w',
            Color::Black => 'b',
        });

        out.push(' ');
        if self.castling == 0 {
            out.push('-');
        } else {
            // Lettere sempre in ordine canonico KQkq
            for (bit, ch) in [
                (CASTLE_WK, 'K'),
                (CASTLE_WQ, 'Q'),
                (CASTLE_BK, 'k'),
                (CASTLE_BQ, 'q'),
            ] {
                if self.castling & bit != 0 {
                    out.push(ch);
                }
            }
        }

        out.push(' ');
        match self.ep {
            Some(sq) => out.push_str(&square_to_text(sq as usize)),
            None => out.push('-'),
        }

        out.push_str(&format!(" {} {}", self.halfmove, self.fullmove));
        out
    }
}

fn parse_clock(text: &str, what: &str) -> Result<u16, RulesError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RulesError::MalformedNotation(format!(
            "bad {} clock '{}'",
            what, text
        )));
    }
    text.parse()
        .map_err(|_| RulesError::MalformedNotation(format!("{} clock '{}' out of range", what, text)))
}

// Attack detection ----------------------------------------------------

impl Position {
    pub fn is_square_attacked(&self, sq: usize, by: Color) -> bool {
        let mask = 1u64 << sq;

        // Pawn attacks
        let pawns = self.piece_bb(PieceKind::Pawn, by);
        let pawn_attacks = match by {
            Color::White => ((pawns & NOT_FILE_A) << 7) | ((pawns & NOT_FILE_H) << 9),
            Color::Black => ((pawns & NOT_FILE_A) >> 9) | ((pawns & NOT_FILE_H) >> 7),
        };
        if pawn_attacks & mask != 0 {
            return true;
        }

        if knight_attacks(sq) & self.piece_bb(PieceKind::Knight, by) != 0 {
            return true;
        }
        if king_attacks(sq) & self.piece_bb(PieceKind::King, by) != 0 {
            return true;
        }

        // Sliding pieces: first blocker on each ray decides
        let diagonal = self.piece_bb(PieceKind::Bishop, by) | self.piece_bb(PieceKind::Queen, by);
        if diagonal != 0 {
            for dir in DIAGONAL_DIRS {
                if let Some(hit) = ray_first_hit(self.occ, sq, dir) {
                    if diagonal & (1u64 << hit) != 0 {
                        return true;
                    }
                }
            }
        }
        let orthogonal = self.piece_bb(PieceKind::Rook, by) | self.piece_bb(PieceKind::Queen, by);
        if orthogonal != 0 {
            for dir in ORTHOGONAL_DIRS {
                if let Some(hit) = ray_first_hit(self.occ, sq, dir) {
                    if orthogonal & (1u64 << hit) != 0 {
                        return true;
                    }
                }
            }
        }
        false
    }

    pub fn is_in_check(&self, color: Color) -> bool {
        self.is_square_attacked(self.king_sq(color), color.opponent())
    }
}

// Move generation -----------------------------------------------------

impl Position {
    /// Legal moves for every piece of the side to move.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = self.pseudo_moves();
        // Un candidato è legale sse la posizione risultante non lascia il
        // proprio re sotto scacco: il test gira sulla posizione DOPO la mossa.
        moves.retain(|&mv| !self.apply(mv).is_in_check(self.side));
        moves
    }

    /// Legal moves from one square only; empty when the square does not
    /// hold a piece of the side to move.
    pub fn legal_moves_from(&self, from: usize) -> Vec<Move> {
        let mut moves = self.legal_moves();
        moves.retain(|&mv| move_from_sq(mv) == from);
        moves
    }

    pub fn has_legal_moves(&self) -> bool {
        self.pseudo_moves()
            .iter()
            .any(|&mv| !self.apply(mv).is_in_check(self.side))
    }

    pub fn is_checkmate(&self) -> bool {
        self.is_in_check(self.side) && !self.has_legal_moves()
    }

    pub fn is_stalemate(&self) -> bool {
        !self.is_in_check(self.side) && !self.has_legal_moves()
    }

    /// Resolve 4/5-char move text against this position's legal moves.
    pub fn parse_move(&self, text: &str) -> Result<Move, RulesError> {
        let (from, to, promotion) = parse_move_text(text)?;
        self.legal_moves()
            .into_iter()
            .find(|&mv| {
                move_from_sq(mv) == from
                    && move_to_sq(mv) == to
                    && move_promotion(mv) == promotion
            })
            .ok_or_else(|| RulesError::IllegalMove(text.to_string()))
    }

    pub fn is_legal_move(&self, text: &str) -> bool {
        self.parse_move(text).is_ok()
    }

    fn pseudo_moves(&self) -> Vec<Move> {
        let mut out = Vec::with_capacity(64);
        self.pawn_pseudos(&mut out);
        self.knight_pseudos(&mut out);
        self.slider_pseudos(PieceKind::Bishop, &DIAGONAL_DIRS, &mut out);
        self.slider_pseudos(PieceKind::Rook, &ORTHOGONAL_DIRS, &mut out);
        self.slider_pseudos(PieceKind::Queen, &DIAGONAL_DIRS, &mut out);
        self.slider_pseudos(PieceKind::Queen, &ORTHOGONAL_DIRS, &mut out);
        self.king_pseudos(&mut out);
        out
    }

    fn pawn_pseudos(&self, out: &mut Vec<Move>) {
        let side = self.side;
        let pawns = self.piece_bb(PieceKind::Pawn, side);
        let empty = !self.occ;
        let enemy_occ = self.occ_of(side.opponent());
        let prom_rank = match side {
            Color::White => RANK_8,
            Color::Black => RANK_1,
        };

        let push_dest = match side {
            Color::White => (pawns << 8) & empty,
            Color::Black => (pawns >> 8) & empty,
        };
        let push_from = |to: usize| match side {
            Color::White => to - 8,
            Color::Black => to + 8,
        };

        // Single pushes (promotions handled below)
        let mut bb = push_dest & !prom_rank;
        while let Some(to) = pop_lsb(&mut bb) {
            out.push(new_move(push_from(to), to, PieceKind::Pawn, None, None, FLAG_NONE));
        }

        // Double pushes: only from the start rank, both squares empty
        let start_rank = match side {
            Color::White => RANK_2,
            Color::Black => RANK_7,
        };
        let first_push = match side {
            Color::White => ((pawns & start_rank) << 8) & empty,
            Color::Black => ((pawns & start_rank) >> 8) & empty,
        };
        let mut bb = match side {
            Color::White => (first_push << 8) & empty,
            Color::Black => (first_push >> 8) & empty,
        };
        while let Some(to) = pop_lsb(&mut bb) {
            let from = match side {
                Color::White => to - 16,
                Color::Black => to + 16,
            };
            out.push(new_move(from, to, PieceKind::Pawn, None, None, FLAG_NONE));
        }

        // Diagonal captures; the promotion rank is carved out for the
        // promotion loop so no capture lands on the last rank un-promoted.
        let east_capture = match side {
            Color::White => ((pawns & NOT_FILE_H) << 9) & enemy_occ,
            Color::Black => ((pawns & NOT_FILE_H) >> 7) & enemy_occ,
        };
        let east_from = |to: usize| match side {
            Color::White => to - 9,
            Color::Black => to + 7,
        };
        let west_capture = match side {
            Color::White => ((pawns & NOT_FILE_A) << 7) & enemy_occ,
            Color::Black => ((pawns & NOT_FILE_A) >> 9) & enemy_occ,
        };
        let west_from = |to: usize| match side {
            Color::White => to - 7,
            Color::Black => to + 9,
        };

        for (capture_bb, from_of) in [
            (east_capture, &east_from as &dyn Fn(usize) -> usize),
            (west_capture, &west_from),
        ] {
            let mut bb = capture_bb & !prom_rank;
            while let Some(to) = pop_lsb(&mut bb) {
                let captured = self.piece_on(to).map(|(k, _)| k);
                out.push(new_move(
                    from_of(to),
                    to,
                    PieceKind::Pawn,
                    captured,
                    None,
                    FLAG_CAPTURE,
                ));
            }
        }

        // En passant: la casella bersaglio è vuota, il pedone catturato sta
        // dietro di essa.
        if let Some(ep_sq) = self.ep {
            let ep_sq = ep_sq as usize;
            let ep_file = ep_sq % 8;
            let mut attackers = 0u64;
            match side {
                Color::White => {
                    if ep_file > 0 {
                        attackers |= pawns & (1u64 << (ep_sq - 9));
                    }
                    if ep_file < 7 {
                        attackers |= pawns & (1u64 << (ep_sq - 7));
                    }
                }
                Color::Black => {
                    if ep_file > 0 {
                        attackers |= pawns & (1u64 << (ep_sq + 7));
                    }
                    if ep_file < 7 {
                        attackers |= pawns & (1u64 << (ep_sq + 9));
                    }
                }
            }
            while let Some(from) = pop_lsb(&mut attackers) {
                out.push(new_move(
                    from,
                    ep_sq,
                    PieceKind::Pawn,
                    Some(PieceKind::Pawn),
                    None,
                    FLAG_EN_PASSANT | FLAG_CAPTURE,
                ));
            }
        }

        // Promotions: every landing on the far rank enumerates all four kinds
        const PROMOTIONS: [PieceKind; 4] = [
            PieceKind::Queen,
            PieceKind::Rook,
            PieceKind::Bishop,
            PieceKind::Knight,
        ];
        let mut bb = push_dest & prom_rank;
        while let Some(to) = pop_lsb(&mut bb) {
            for kind in PROMOTIONS {
                out.push(new_move(
                    push_from(to),
                    to,
                    PieceKind::Pawn,
                    None,
                    Some(kind),
                    FLAG_PROMOTION,
                ));
            }
        }
        for (capture_bb, from_of) in [
            (east_capture, &east_from as &dyn Fn(usize) -> usize),
            (west_capture, &west_from),
        ] {
            let mut bb = capture_bb & prom_rank;
            while let Some(to) = pop_lsb(&mut bb) {
                let captured = self.piece_on(to).map(|(k, _)| k);
                for kind in PROMOTIONS {
                    out.push(new_move(
                        from_of(to),
                        to,
                        PieceKind::Pawn,
                        captured,
                        Some(kind),
                        FLAG_PROMOTION | FLAG_CAPTURE,
                    ));
                }
            }
        }
    }

    fn knight_pseudos(&self, out: &mut Vec<Move>) {
        let side = self.side;
        let enemy_occ = self.occ_of(side.opponent());
        let mut knights = self.piece_bb(PieceKind::Knight, side);
        while let Some(from) = pop_lsb(&mut knights) {
            let attacks = knight_attacks(from);
            let mut quiet = attacks & !self.occ;
            while let Some(to) = pop_lsb(&mut quiet) {
                out.push(new_move(from, to, PieceKind::Knight, None, None, FLAG_NONE));
            }
            let mut captures = attacks & enemy_occ;
            while let Some(to) = pop_lsb(&mut captures) {
                let captured = self.piece_on(to).map(|(k, _)| k);
                out.push(new_move(
                    from,
                    to,
                    PieceKind::Knight,
                    captured,
                    None,
                    FLAG_CAPTURE,
                ));
            }
        }
    }

    fn slider_pseudos(&self, kind: PieceKind, dirs: &[(i8, i8)], out: &mut Vec<Move>) {
        let side = self.side;
        let enemy_occ = self.occ_of(side.opponent());
        let mut pieces = self.piece_bb(kind, side);
        while let Some(from) = pop_lsb(&mut pieces) {
            for &dir in dirs {
                for to in ray_squares(self.occ, from, dir) {
                    let mask = 1u64 << to;
                    if self.occ & mask == 0 {
                        out.push(new_move(from, to, kind, None, None, FLAG_NONE));
                    } else if enemy_occ & mask != 0 {
                        let captured = self.piece_on(to).map(|(k, _)| k);
                        out.push(new_move(from, to, kind, captured, None, FLAG_CAPTURE));
                    }
                    // A friendly blocker just ends the ray
                }
            }
        }
    }

    fn king_pseudos(&self, out: &mut Vec<Move>) {
        let side = self.side;
        let enemy_occ = self.occ_of(side.opponent());
        let mut kings = self.piece_bb(PieceKind::King, side);
        while let Some(from) = pop_lsb(&mut kings) {
            let attacks = king_attacks(from);

            let mut quiet = attacks & !self.occ;
            while let Some(to) = pop_lsb(&mut quiet) {
                out.push(new_move(from, to, PieceKind::King, None, None, FLAG_NONE));
            }
            let mut captures = attacks & enemy_occ;
            while let Some(to) = pop_lsb(&mut captures) {
                let captured = self.piece_on(to).map(|(k, _)| k);
                out.push(new_move(
                    from,
                    to,
                    PieceKind::King,
                    captured,
                    None,
                    FLAG_CAPTURE,
                ));
            }

            self.castle_pseudos(from, out);
        }
    }

    fn castle_pseudos(&self, king_from: usize, out: &mut Vec<Move>) {
        let side = self.side;
        let enemy = side.opponent();
        let king_home = match side {
            Color::White => 4,
            Color::Black => 60,
        };
        if king_from != king_home {
            return;
        }

        // (right bit, rook home, king target, between squares, king path)
        // Il percorso del re comprende partenza, transito e arrivo: niente
        // arrocco attraverso o dentro lo scacco.
        const W_KS_BETWEEN: &[usize] = &[5, 6];
        const W_QS_BETWEEN: &[usize] = &[1, 2, 3];
        const B_KS_BETWEEN: &[usize] = &[61, 62];
        const B_QS_BETWEEN: &[usize] = &[57, 58, 59];
        let lines: [(u8, usize, usize, &[usize], [usize; 3], u32); 2] = match side {
            Color::White => [
                (CASTLE_WK, 7, 6, W_KS_BETWEEN, [4, 5, 6], FLAG_CASTLE_KING),
                (CASTLE_WQ, 0, 2, W_QS_BETWEEN, [4, 3, 2], FLAG_CASTLE_QUEEN),
            ],
            Color::Black => [
                (CASTLE_BK, 63, 62, B_KS_BETWEEN, [60, 61, 62], FLAG_CASTLE_KING),
                (CASTLE_BQ, 56, 58, B_QS_BETWEEN, [60, 59, 58], FLAG_CASTLE_QUEEN),
            ],
        };

        for (right, rook_home, king_to, between, king_path, flag) in lines {
            if self.castling & right == 0 {
                continue;
            }
            if self.piece_bb(PieceKind::Rook, side) & (1u64 << rook_home) == 0 {
                continue;
            }
            if between.iter().any(|&sq| self.is_occupied(sq)) {
                continue;
            }
            if king_path.iter().any(|&sq| self.is_square_attacked(sq, enemy)) {
                continue;
            }
            out.push(new_move(king_from, king_to, PieceKind::King, None, None, flag));
        }
    }
}

// Position mutation ---------------------------------------------------

impl Position {
    /// Apply a move produced by `legal_moves` for this exact position and
    /// return the resulting position. No legality check happens here.
    pub fn apply(&self, mv: Move) -> Position {
        let mut next = self.clone();
        let from = move_from_sq(mv);
        let to = move_to_sq(mv);
        let piece = move_piece(mv);
        let mover = self.side;
        let enemy = mover.opponent();
        let captured = move_captured(mv);

        next.remove_piece(from, piece, mover);
        if let Some(capt) = captured {
            // In en passant il pedone catturato sta dietro la destinazione
            let cap_sq = if move_flag(mv, FLAG_EN_PASSANT) {
                match mover {
                    Color::White => to - 8,
                    Color::Black => to + 8,
                }
            } else {
                to
            };
            next.remove_piece(cap_sq, capt, enemy);
        }
        next.set_piece(to, move_promotion(mv).unwrap_or(piece), mover);

        if move_flag(mv, FLAG_CASTLE_KING) {
            let (rook_from, rook_to) = match mover {
                Color::White => (7, 5),
                Color::Black => (63, 61),
            };
            next.remove_piece(rook_from, PieceKind::Rook, mover);
            next.set_piece(rook_to, PieceKind::Rook, mover);
        } else if move_flag(mv, FLAG_CASTLE_QUEEN) {
            let (rook_from, rook_to) = match mover {
                Color::White => (0, 3),
                Color::Black => (56, 59),
            };
            next.remove_piece(rook_from, PieceKind::Rook, mover);
            next.set_piece(rook_to, PieceKind::Rook, mover);
        }

        next.castling &= castling_mask(from) & castling_mask(to);

        next.ep = if piece == PieceKind::Pawn && to.abs_diff(from) == 16 {
            Some(((from + to) / 2) as u8)
        } else {
            None
        };

        next.halfmove = if piece == PieceKind::Pawn || captured.is_some() {
            0
        } else {
            self.halfmove + 1
        };
        next.side = enemy;
        if enemy == Color::White {
            next.fullmove = self.fullmove + 1;
        }

        next.refresh_occupancy();
        next
    }
}

/// Node count of the legal move tree; the movegen acceptance gate.
pub fn perft(pos: &Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    pos.legal_moves()
        .into_iter()
        .map(|mv| perft(&pos.apply(mv), depth - 1))
        .sum()
}

// Simple display (board dump for logs and debugging)
impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for rank in (0..8).rev() {
            for file in 0..8 {
                match self.piece_on(rank * 8 + file) {
                    Some((kind, color)) => write!(f, "{} ", piece_letter(kind, color))?,
                    None => write!(f, ". ")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn en_passant_removes_pawn_behind_destination() {
        let pos = Position::from_fen("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 3").unwrap();
        let mv = pos.parse_move("e5d6").expect("en passant capture is legal");
        assert!(move_flag(mv, FLAG_EN_PASSANT));
        let next = pos.apply(mv);
        // Captured pawn was on d5, not on the destination square d6
        assert_eq!(next.piece_on(text_to_square("d5").unwrap()), None);
        assert_eq!(
            next.piece_on(text_to_square("d6").unwrap()),
            Some((PieceKind::Pawn, Color::White))
        );
        assert_eq!(next.halfmove, 0);
    }

    #[test]
    fn castling_rights_revocation_is_monotonic() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        // Rook leaves h1 and comes straight back: the kingside right stays gone
        let after = pos
            .apply(pos.parse_move("h1g1").unwrap())
            .apply_text("h8g8")
            .apply_text("g1h1")
            .apply_text("g8h8");
        assert_eq!(after.castling, CASTLE_WQ | CASTLE_BQ);
    }

    #[test]
    fn rook_capture_on_corner_revokes_opponent_right() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let next = pos.apply(pos.parse_move("a1a8").unwrap());
        assert_eq!(next.castling & CASTLE_BQ, 0);
        assert_ne!(next.castling & CASTLE_BK, 0);
    }

    #[test]
    fn promotion_enumerates_all_four_kinds() {
        let pos = Position::from_fen("8/4P3/8/8/8/8/8/k1K5 w - - 0 1").unwrap();
        let moves = pos.legal_moves_from(text_to_square("e7").unwrap());
        let mut kinds: Vec<u8> = moves
            .iter()
            .filter_map(|&m| move_promotion(m))
            .map(|p| p as u8)
            .collect();
        kinds.sort_unstable();
        kinds.dedup();
        assert_eq!(moves.len(), 4);
        assert_eq!(kinds.len(), 4, "promotion kinds must all be distinct");
    }

    #[test]
    fn clocks_and_side_bookkeeping() {
        let pos = Position::startpos();
        let after_white = pos.apply(pos.parse_move("g1f3").unwrap());
        assert_eq!(after_white.halfmove, 1);
        assert_eq!(after_white.fullmove, 1);
        assert_eq!(after_white.side, Color::Black);
        let after_black = after_white.apply(after_white.parse_move("b8c6").unwrap());
        assert_eq!(after_black.halfmove, 2);
        assert_eq!(after_black.fullmove, 2);
        // Pawn move resets the halfmove clock
        let after_pawn = after_black.apply(after_black.parse_move("e2e4").unwrap());
        assert_eq!(after_pawn.halfmove, 0);
        assert_eq!(after_pawn.ep, Some(text_to_square("e3").unwrap() as u8));
    }

    #[test]
    fn double_push_blocked_by_occupied_transit() {
        let pos = Position::from_fen("4k3/8/8/8/8/4n3/4P3/4K3 w - - 0 1").unwrap();
        assert!(!pos.is_legal_move("e2e4"));
        assert!(!pos.is_legal_move("e2e3"));
    }

    impl Position {
        fn apply_text(&self, text: &str) -> Position {
            self.apply(self.parse_move(text).expect(text))
        }
    }
}
