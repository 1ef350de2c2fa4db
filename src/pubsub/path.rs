use std::{fmt, str::FromStr, sync::Arc};

use volna_error::PathError;

/// Разделитель сегментов пути.
pub const SEPARATOR: char = '/';
/// Подстановка ровно одного сегмента.
pub const SINGLE_WILDCARD: &str = "*";
/// Хвостовая подстановка нуля или более сегментов.
pub const MULTI_WILDCARD: &str = "**";

/// Сегмент шаблона подписки.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Буквальный сегмент, сравнивается с учётом регистра
    Literal(Arc<str>),
    /// `*`: ровно один любой сегмент
    Single,
    /// `**`: ноль или более оставшихся сегментов (только последним)
    Multi,
}

/// Точный путь темы без подстановок, например `/chat/room/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    raw: Arc<str>,
    segments: Arc<[Arc<str>]>,
}

/// Шаблон подписки, например `/chat/*/42` или `/chat/**`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    raw: Arc<str>,
    segments: Arc<[Segment]>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Path {
    /// Разбирает точный путь темы.
    ///
    /// Путь обязан начинаться с `/`, не содержать пустых сегментов и
    /// подстановок.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let parts = split_segments(raw)?;
        if parts
            .iter()
            .any(|s| *s == SINGLE_WILDCARD || *s == MULTI_WILDCARD)
        {
            return Err(PathError::WildcardInTopic {
                path: raw.to_string(),
            });
        }
        Ok(Self {
            raw: Arc::from(raw),
            segments: parts.into_iter().map(Arc::from).collect(),
        })
    }

    /// Строковое представление пути.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Сегменты пути по порядку.
    pub fn segments(&self) -> &[Arc<str>] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl Pattern {
    /// Разбирает шаблон подписки.
    ///
    /// `*` допустим в любой позиции, `**` только последним сегментом.
    /// Сегменты вида `a*` отклоняются.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let parts = split_segments(raw)?;
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());

        for (position, part) in parts.iter().enumerate() {
            let segment = match *part {
                SINGLE_WILDCARD => Segment::Single,
                MULTI_WILDCARD if position == last => Segment::Multi,
                MULTI_WILDCARD => {
                    return Err(PathError::MisplacedMultiWildcard {
                        pattern: raw.to_string(),
                        position,
                    })
                }
                other if other.contains('*') => {
                    return Err(PathError::PartialWildcard {
                        pattern: raw.to_string(),
                        segment: other.to_string(),
                    })
                }
                other => Segment::Literal(Arc::from(other)),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: Arc::from(raw),
            segments: segments.into(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Шаблон без подстановок.
    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Проверяет, подходит ли путь под шаблон.
    pub fn matches(
        &self,
        candidate: &Path,
    ) -> bool {
        matches(self, candidate)
    }
}

/// Сопоставляет путь с шаблоном за один проход по сегментам.
///
/// Ошибок во время сопоставления нет: некорректные шаблоны отсекаются
/// в [`Pattern::parse`].
pub fn matches(
    pattern: &Pattern,
    candidate: &Path,
) -> bool {
    let topic = candidate.segments();
    for (i, segment) in pattern.segments().iter().enumerate() {
        match segment {
            Segment::Multi => return true,
            Segment::Single => {
                if i >= topic.len() {
                    return false;
                }
            }
            Segment::Literal(lit) => match topic.get(i) {
                Some(part) if part == lit => {}
                _ => return false,
            },
        }
    }
    topic.len() == pattern.segments().len()
}

/// Делит строку на сегменты, проверяя ведущий `/` и пустые сегменты.
fn split_segments(raw: &str) -> Result<Vec<&str>, PathError> {
    if raw.is_empty() || raw == "/" {
        return Err(PathError::Empty);
    }
    let Some(rest) = raw.strip_prefix(SEPARATOR) else {
        return Err(PathError::NotAbsolute {
            path: raw.to_string(),
        });
    };
    let parts: Vec<&str> = rest.split(SEPARATOR).collect();
    if let Some(position) = parts.iter().position(|s| s.is_empty()) {
        return Err(PathError::EmptySegment {
            path: raw.to_string(),
            position,
        });
    }
    Ok(parts)
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для Path и Pattern
////////////////////////////////////////////////////////////////////////////////

impl fmt::Display for Path {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Display for Pattern {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for Pattern {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Path> for Pattern {
    fn from(path: Path) -> Self {
        Self {
            segments: path
                .segments
                .iter()
                .map(|s| Segment::Literal(s.clone()))
                .collect(),
            raw: path.raw,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
