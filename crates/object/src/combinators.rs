pub use nom::{
    bytes::complete::tag,
    error::{ErrorKind, ParseError},
    sequence::tuple,
    Err,
};
use nom::{bytes::complete::take, ToUsize};

use crate::{Input, Result};

/// Like `take` but it “skips” the parsed value.
pub fn skip<'a, C, E>(count: C) -> impl FnMut(Input<'a>) -> Result<'a, Input<'a>, E>
where
    C: ToUsize,
    E: ParseError<Input<'a>>,
{
    let count = count.to_usize();

    move |input: Input<'a>| {
        let (input, _skipped) = take(count)(input)?;

        Ok((input, &[][..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip() {
        let input: &[u8] = &[1, 2, 3, 4, 5];

        assert_eq!(skip::<_, ()>(2usize)(input), Ok((&[3, 4, 5][..], &[] as &[u8])));
    }

    #[test]
    fn test_skip_too_far() {
        let input: &[u8] = &[1, 2];

        assert!(skip::<_, ()>(3usize)(input).is_err());
    }
}
