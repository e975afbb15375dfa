//! Troceado de texto en chunks aptos para embeddings.
//!
//! Dos políticas:
//!   - `Paragraph`: corta por líneas en blanco y descarta fragmentos demasiado
//!     cortos (ruido de cabeceras, números de página...). Los párrafos que
//!     superan `max_chars` se parten por palabras.
//!   - `Windowed`: ventanas de `chunk_size` palabras que avanzan
//!     `chunk_size - overlap` palabras en cada paso.
//!
//! `Chunker::chunks` devuelve un iterador perezoso; volver a llamarlo reinicia
//! la secuencia.

use std::collections::VecDeque;

use crate::error::{PipelineError, Result};
use crate::models::Chunk;

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkingPolicy {
    Paragraph { min_chars: usize, max_chars: usize },
    Windowed { chunk_size: usize, overlap: usize },
}

/// Troceador validado. Sólo se puede construir con una política coherente.
#[derive(Debug, Clone)]
pub struct Chunker {
    policy: ChunkingPolicy,
}

impl Chunker {
    pub fn new(policy: ChunkingPolicy) -> Result<Self> {
        match &policy {
            ChunkingPolicy::Paragraph { min_chars, max_chars } => {
                if *max_chars == 0 || min_chars > max_chars {
                    return Err(PipelineError::InvalidConfiguration(format!(
                        "min_chars ({min_chars}) debe ser <= max_chars ({max_chars}) y max_chars > 0"
                    )));
                }
            }
            ChunkingPolicy::Windowed { chunk_size, overlap } => {
                if *chunk_size == 0 {
                    return Err(PipelineError::InvalidConfiguration(
                        "chunk_size debe ser mayor que cero".to_string(),
                    ));
                }
                if overlap >= chunk_size {
                    return Err(PipelineError::InvalidConfiguration(format!(
                        "overlap ({overlap}) debe ser menor que chunk_size ({chunk_size})"
                    )));
                }
            }
        }
        Ok(Self { policy })
    }

    /// Atajo para el modo párrafo.
    pub fn paragraphs(min_chars: usize, max_chars: usize) -> Result<Self> {
        Self::new(ChunkingPolicy::Paragraph { min_chars, max_chars })
    }

    /// Atajo para el modo ventana.
    pub fn windowed(chunk_size: usize, overlap: usize) -> Result<Self> {
        Self::new(ChunkingPolicy::Windowed { chunk_size, overlap })
    }

    pub fn chunks<'a>(&self, text: &'a str) -> Chunks<'a> {
        let state = match self.policy {
            ChunkingPolicy::Paragraph { min_chars, max_chars } => State::Paragraph {
                fragments: text.split("\n\n"),
                pending: VecDeque::new(),
                min_chars,
                max_chars,
            },
            ChunkingPolicy::Windowed { chunk_size, overlap } => State::Windowed {
                words: text.split_whitespace().collect(),
                start: 0,
                chunk_size,
                step: chunk_size - overlap,
                done: false,
            },
        };
        Chunks { state, next_index: 0 }
    }
}

/// Secuencia perezosa y finita de chunks, en el orden del texto original.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    state: State<'a>,
    next_index: usize,
}

#[derive(Debug, Clone)]
enum State<'a> {
    Paragraph {
        fragments: std::str::Split<'a, &'static str>,
        pending: VecDeque<String>,
        min_chars: usize,
        max_chars: usize,
    },
    Windowed {
        words: Vec<&'a str>,
        start: usize,
        chunk_size: usize,
        step: usize,
        done: bool,
    },
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let text = match &mut self.state {
            State::Paragraph { fragments, pending, min_chars, max_chars } => loop {
                if let Some(piece) = pending.pop_front() {
                    break piece;
                }
                let fragment = fragments.next()?.trim();
                let len = fragment.chars().count();
                if len < *min_chars || fragment.is_empty() {
                    continue;
                }
                if len <= *max_chars {
                    break fragment.to_string();
                }
                // Los trozos de un párrafo partido también pasan el mínimo.
                let min = *min_chars;
                pending.extend(
                    split_at_words(fragment, *max_chars)
                        .into_iter()
                        .filter(|p| p.chars().count() >= min),
                );
            },
            State::Windowed { words, start, chunk_size, step, done } => {
                if *done || *start >= words.len() {
                    return None;
                }
                let end = (*start + *chunk_size).min(words.len());
                let window = words[*start..end].join(" ");
                if end == words.len() {
                    *done = true;
                } else {
                    *start += *step;
                }
                window
            }
        };

        let chunk = Chunk { index: self.next_index, text };
        self.next_index += 1;
        Some(chunk)
    }
}

/// Parte un fragmento largo en trozos de como mucho `max_chars` caracteres,
/// respetando los límites de palabra siempre que sea posible.
fn split_at_words(fragment: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in fragment.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max_chars).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { word_len } else { current_len + 1 + word_len };
        if needed > max_chars {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}
