use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::constants::{CATEGORY_SIZE, MOVIE_ID_SIZE, NAME_SIZE, PERSON_ID_SIZE, TITLE_SIZE};
use crate::fixed_str::FixedStr;

/// The wire format between operators: an ordered list of string fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tuple {
    pub fields: Vec<String>,
}

impl Tuple {
    pub fn new(fields: Vec<String>) -> Self {
        Tuple { fields }
    }
}

/// A fixed-width record that can live in a heap page.
///
/// `from_tuple` pulls named fields out of a tuple using a column-index map,
/// so the same row type can be built from differently shaped upstream tuples.
pub trait Rowable: Sized {
    const ROW_SIZE: usize;

    /// Serialize into exactly `ROW_SIZE` bytes.
    fn write_to(&self, buf: &mut [u8]);

    /// Deserialize from exactly `ROW_SIZE` bytes.
    fn read_from(buf: &[u8]) -> Self;

    fn to_tuple(&self) -> Tuple;

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self>;
}

fn field<'a>(t: &'a Tuple, idx_map: &HashMap<String, usize>, name: &str) -> Result<&'a str> {
    let i = *idx_map
        .get(name)
        .ok_or_else(|| anyhow!("column {} missing from index map", name))?;
    let f = t
        .fields
        .get(i)
        .ok_or_else(|| anyhow!("tuple has no field {} for column {}", i, name))?;
    Ok(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieRow {
    pub movie_id: FixedStr<MOVIE_ID_SIZE>,
    pub title: FixedStr<TITLE_SIZE>,
}

impl MovieRow {
    pub fn new(movie_id: &str, title: &str) -> Self {
        MovieRow {
            movie_id: FixedStr::new(movie_id),
            title: FixedStr::new(title),
        }
    }
}

impl Rowable for MovieRow {
    const ROW_SIZE: usize = MOVIE_ID_SIZE + TITLE_SIZE;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..MOVIE_ID_SIZE].copy_from_slice(self.movie_id.as_bytes());
        buf[MOVIE_ID_SIZE..Self::ROW_SIZE].copy_from_slice(self.title.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        MovieRow {
            movie_id: FixedStr::from_bytes(&buf[..MOVIE_ID_SIZE]),
            title: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE..Self::ROW_SIZE]),
        }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![self.movie_id.to_string(), self.title.to_string()])
    }

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self> {
        Ok(MovieRow::new(
            field(t, idx_map, "movieId")?,
            field(t, idx_map, "title")?,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkedOnRow {
    pub movie_id: FixedStr<MOVIE_ID_SIZE>,
    pub person_id: FixedStr<PERSON_ID_SIZE>,
    pub category: FixedStr<CATEGORY_SIZE>,
}

impl WorkedOnRow {
    pub fn new(movie_id: &str, person_id: &str, category: &str) -> Self {
        WorkedOnRow {
            movie_id: FixedStr::new(movie_id),
            person_id: FixedStr::new(person_id),
            category: FixedStr::new(category),
        }
    }
}

impl Rowable for WorkedOnRow {
    const ROW_SIZE: usize = MOVIE_ID_SIZE + PERSON_ID_SIZE + CATEGORY_SIZE;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..MOVIE_ID_SIZE].copy_from_slice(self.movie_id.as_bytes());
        buf[MOVIE_ID_SIZE..MOVIE_ID_SIZE + PERSON_ID_SIZE]
            .copy_from_slice(self.person_id.as_bytes());
        buf[MOVIE_ID_SIZE + PERSON_ID_SIZE..Self::ROW_SIZE]
            .copy_from_slice(self.category.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        WorkedOnRow {
            movie_id: FixedStr::from_bytes(&buf[..MOVIE_ID_SIZE]),
            person_id: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE..MOVIE_ID_SIZE + PERSON_ID_SIZE]),
            category: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE + PERSON_ID_SIZE..Self::ROW_SIZE]),
        }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            self.movie_id.to_string(),
            self.person_id.to_string(),
            self.category.to_string(),
        ])
    }

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self> {
        Ok(WorkedOnRow::new(
            field(t, idx_map, "movieId")?,
            field(t, idx_map, "personId")?,
            field(t, idx_map, "category")?,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersonRow {
    pub person_id: FixedStr<PERSON_ID_SIZE>,
    pub name: FixedStr<NAME_SIZE>,
}

impl PersonRow {
    pub fn new(person_id: &str, name: &str) -> Self {
        PersonRow {
            person_id: FixedStr::new(person_id),
            name: FixedStr::new(name),
        }
    }
}

impl Rowable for PersonRow {
    const ROW_SIZE: usize = PERSON_ID_SIZE + NAME_SIZE;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..PERSON_ID_SIZE].copy_from_slice(self.person_id.as_bytes());
        buf[PERSON_ID_SIZE..Self::ROW_SIZE].copy_from_slice(self.name.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        PersonRow {
            person_id: FixedStr::from_bytes(&buf[..PERSON_ID_SIZE]),
            name: FixedStr::from_bytes(&buf[PERSON_ID_SIZE..Self::ROW_SIZE]),
        }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![self.person_id.to_string(), self.name.to_string()])
    }

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self> {
        Ok(PersonRow::new(
            field(t, idx_map, "personId")?,
            field(t, idx_map, "name")?,
        ))
    }
}

/// (movieId, personId) intermediate for the materialized WorkedOn projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkedOnKeyRow {
    pub movie_id: FixedStr<MOVIE_ID_SIZE>,
    pub person_id: FixedStr<PERSON_ID_SIZE>,
}

impl WorkedOnKeyRow {
    pub fn new(movie_id: &str, person_id: &str) -> Self {
        WorkedOnKeyRow {
            movie_id: FixedStr::new(movie_id),
            person_id: FixedStr::new(person_id),
        }
    }
}

impl Rowable for WorkedOnKeyRow {
    const ROW_SIZE: usize = MOVIE_ID_SIZE + PERSON_ID_SIZE;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..MOVIE_ID_SIZE].copy_from_slice(self.movie_id.as_bytes());
        buf[MOVIE_ID_SIZE..Self::ROW_SIZE].copy_from_slice(self.person_id.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        WorkedOnKeyRow {
            movie_id: FixedStr::from_bytes(&buf[..MOVIE_ID_SIZE]),
            person_id: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE..Self::ROW_SIZE]),
        }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![self.movie_id.to_string(), self.person_id.to_string()])
    }

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self> {
        Ok(WorkedOnKeyRow::new(
            field(t, idx_map, "movieId")?,
            field(t, idx_map, "personId")?,
        ))
    }
}

/// (movieId, title, personId): block row for the second join's left side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovieWorkedOnRow {
    pub movie_id: FixedStr<MOVIE_ID_SIZE>,
    pub title: FixedStr<TITLE_SIZE>,
    pub person_id: FixedStr<PERSON_ID_SIZE>,
}

impl Rowable for MovieWorkedOnRow {
    const ROW_SIZE: usize = MOVIE_ID_SIZE + TITLE_SIZE + PERSON_ID_SIZE;

    fn write_to(&self, buf: &mut [u8]) {
        buf[..MOVIE_ID_SIZE].copy_from_slice(self.movie_id.as_bytes());
        buf[MOVIE_ID_SIZE..MOVIE_ID_SIZE + TITLE_SIZE].copy_from_slice(self.title.as_bytes());
        buf[MOVIE_ID_SIZE + TITLE_SIZE..Self::ROW_SIZE].copy_from_slice(self.person_id.as_bytes());
    }

    fn read_from(buf: &[u8]) -> Self {
        MovieWorkedOnRow {
            movie_id: FixedStr::from_bytes(&buf[..MOVIE_ID_SIZE]),
            title: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE..MOVIE_ID_SIZE + TITLE_SIZE]),
            person_id: FixedStr::from_bytes(&buf[MOVIE_ID_SIZE + TITLE_SIZE..Self::ROW_SIZE]),
        }
    }

    fn to_tuple(&self) -> Tuple {
        Tuple::new(vec![
            self.movie_id.to_string(),
            self.title.to_string(),
            self.person_id.to_string(),
        ])
    }

    fn from_tuple(t: &Tuple, idx_map: &HashMap<String, usize>) -> Result<Self> {
        Ok(MovieWorkedOnRow {
            movie_id: FixedStr::new(field(t, idx_map, "movieId")?),
            title: FixedStr::new(field(t, idx_map, "title")?),
            person_id: FixedStr::new(field(t, idx_map, "personId")?),
        })
    }
}
